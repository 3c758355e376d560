use anyhow::{bail, Context, Result};
use base64::prelude::{Engine as _, BASE64_STANDARD};
use clap::{Args, Subcommand};
use reqwest::Method;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

use crate::config::{mask, Config};
use crate::http_client::{segment, Client};

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Print the management public key, generating it on first use
    Key,
    /// Manage registered nodes
    #[command(subcommand)]
    Nodes(NodeCommands),
    /// Push a local config to a node's sites-available
    Push(FileOnNode),
    /// Fetch a config from a node
    Pull(PullArgs),
    /// Enable a site, test the configuration and reload nginx
    Reload(FileOnNode),
    /// Install certificate files on a node
    Certs(CertsArgs),
    /// Push files to several nodes
    Sync(SyncArgs),
    /// Run one operation on several nodes
    Run(RunArgs),
    /// Show the operation log
    Log(LogArgs),
    /// Manage local config files on the control plane
    #[command(subcommand)]
    Files(FileCommands),
    /// Show or change CLI settings
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand, Debug)]
pub enum NodeCommands {
    /// List nodes
    List,
    /// Register a node
    Add(AddNodeArgs),
    /// Remove a node
    Remove {
        /// Node id
        id: String,
    },
}

#[derive(Args, Debug)]
pub struct AddNodeArgs {
    /// Display name
    pub name: String,
    /// Hostname or IP address
    pub host: String,
    #[arg(long)]
    pub port: Option<u16>,
    /// SSH user (default: root)
    #[arg(long)]
    pub user: Option<String>,
    /// Register without management-key authentication
    #[arg(long)]
    pub no_management_key: bool,
}

#[derive(Args, Debug)]
pub struct FileOnNode {
    /// Node id
    pub node: String,
    /// Config file name
    pub file: String,
}

#[derive(Args, Debug)]
pub struct PullArgs {
    #[command(flatten)]
    pub target: FileOnNode,
    /// Write to a file instead of stdout
    #[arg(short, long)]
    pub output: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct CertsArgs {
    /// Node id
    pub node: String,
    /// Certificate or key files to upload
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Remote directory (default: the server's certificate directory)
    #[arg(long)]
    pub target_dir: Option<String>,
}

#[derive(Args, Debug)]
pub struct SyncArgs {
    /// Config file name (repeatable)
    #[arg(long = "file", required = true)]
    pub files: Vec<String>,
    /// Node id (repeatable)
    #[arg(long = "node", required = true)]
    pub nodes: Vec<String>,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    #[command(subcommand)]
    pub operation: RunOperation,
}

#[derive(Subcommand, Debug)]
pub enum RunOperation {
    /// Push one config to every node
    PushConfig(RunFileArgs),
    /// Enable, test and reload one site on every node
    EnableAndReload(RunFileArgs),
}

#[derive(Args, Debug)]
pub struct RunFileArgs {
    /// Config file name
    pub file: String,
    /// Node id (repeatable)
    #[arg(long = "node", required = true)]
    pub nodes: Vec<String>,
}

#[derive(Args, Debug)]
pub struct LogArgs {
    #[arg(long, default_value_t = 100)]
    pub limit: usize,
}

#[derive(Subcommand, Debug)]
pub enum FileCommands {
    /// List local config files
    List,
    /// Print a local config file
    Get {
        name: String,
        /// Write to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Upload a local config file
    Put {
        name: String,
        /// Read content from this path (default: NAME)
        #[arg(long)]
        from: Option<PathBuf>,
    },
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective settings file
    Show,
    /// Update the settings file
    Set {
        #[arg(long)]
        base_url: Option<String>,
        /// Empty string clears the token
        #[arg(long)]
        token: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct NodeView {
    id: String,
    name: String,
    host: String,
    port: u16,
    user: String,
}

#[derive(Debug, Deserialize)]
struct NodesView {
    nodes: Vec<NodeView>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyView {
    public_key: String,
}

#[derive(Debug, Deserialize)]
struct ContentView {
    content: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ReloadView {
    ok: bool,
    enable_out: String,
    test_out: String,
    reload_out: String,
}

pub async fn run(cmd: Command, client: &Client) -> Result<()> {
    match cmd {
        Command::Key => {
            let key: KeyView = client.request(Method::GET, "/api/cluster/key", None).await?;
            print!("{}", key.public_key);
            if !key.public_key.ends_with('\n') {
                println!();
            }
            Ok(())
        }
        Command::Nodes(cmd) => nodes(cmd, client).await,
        Command::Push(args) => {
            let path = node_path(&args.node, "push-config");
            client
                .send_json(Method::POST, &path, Some(json!({ "filename": args.file })))
                .await
        }
        Command::Pull(args) => {
            let path = node_path(&args.target.node, "pull-config");
            let pulled: ContentView = client
                .request(Method::POST, &path, Some(json!({ "filename": args.target.file })))
                .await?;
            write_output(&pulled.content, args.output.as_deref())
        }
        Command::Reload(args) => {
            let path = node_path(&args.node, "enable-and-reload");
            let outcome: ReloadView = client
                .request(Method::POST, &path, Some(json!({ "filename": args.file })))
                .await?;
            for (label, text) in [
                ("enable", &outcome.enable_out),
                ("test", &outcome.test_out),
                ("reload", &outcome.reload_out),
            ] {
                if !text.is_empty() {
                    println!("--- {} ---\n{}", label, text.trim_end());
                }
            }
            if !outcome.ok {
                bail!("enable-and-reload failed on node {}", args.node);
            }
            Ok(())
        }
        Command::Certs(args) => {
            let body = certs_body(&args.files, args.target_dir.as_deref())?;
            let path = node_path(&args.node, "push-certs");
            client.send_json(Method::POST, &path, Some(body)).await
        }
        Command::Sync(args) => {
            let body = json!({ "files": args.files, "nodes": args.nodes, "action": "push" });
            client
                .send_json(Method::POST, "/api/cluster/sync", Some(body))
                .await
        }
        Command::Run(args) => {
            let (kind, file_args) = match args.operation {
                RunOperation::PushConfig(a) => ("push-config", a),
                RunOperation::EnableAndReload(a) => ("enable-and-reload", a),
            };
            let body = json!({
                "nodes": file_args.nodes,
                "operation": { "type": kind, "filename": file_args.file },
            });
            client
                .send_json(Method::POST, "/api/cluster/run", Some(body))
                .await
        }
        Command::Log(args) => {
            let path = format!("/api/cluster/log?limit={}", args.limit);
            client.send_json(Method::GET, &path, None).await
        }
        Command::Files(cmd) => files(cmd, client).await,
        Command::Config(_) => bail!("config commands do not contact the server"),
    }
}

async fn nodes(cmd: NodeCommands, client: &Client) -> Result<()> {
    match cmd {
        NodeCommands::List => {
            let list: NodesView = client.request(Method::GET, "/api/nodes", None).await?;
            println!(
                "{:<38} {:<20} {:<24} {:<6} {:<10}",
                "ID", "NAME", "HOST", "PORT", "USER"
            );
            for n in list.nodes {
                println!(
                    "{:<38} {:<20} {:<24} {:<6} {:<10}",
                    n.id, n.name, n.host, n.port, n.user
                );
            }
            Ok(())
        }
        NodeCommands::Add(args) => {
            let mut body = json!({
                "name": args.name,
                "host": args.host,
                "useManagementKey": !args.no_management_key,
            });
            if let Some(port) = args.port {
                body["port"] = json!(port);
            }
            if let Some(user) = args.user {
                body["user"] = json!(user);
            }
            client.send_json(Method::POST, "/api/nodes", Some(body)).await
        }
        NodeCommands::Remove { id } => {
            let path = format!("/api/nodes/{}", segment(&id));
            client.send_json(Method::DELETE, &path, None).await
        }
    }
}

async fn files(cmd: FileCommands, client: &Client) -> Result<()> {
    match cmd {
        FileCommands::List => client.send_json(Method::GET, "/api/files", None).await,
        FileCommands::Get { name, output } => {
            let path = format!("/api/files/{}", segment(&name));
            let file: ContentView = client.request(Method::GET, &path, None).await?;
            write_output(&file.content, output.as_deref())
        }
        FileCommands::Put { name, from } => {
            let source = from.unwrap_or_else(|| PathBuf::from(&name));
            let content = std::fs::read_to_string(&source)
                .with_context(|| format!("Failed to read {:?}", source))?;
            let path = format!("/api/files/{}", segment(&name));
            client
                .send_json(Method::PUT, &path, Some(json!({ "content": content })))
                .await
        }
    }
}

pub fn config(cmd: ConfigCommands, mut cfg: Config, path: &Path) -> Result<()> {
    match cmd {
        ConfigCommands::Show => {
            let shown = json!({
                "path": path,
                "base_url": cfg.base_url,
                "token": cfg.token.as_deref().map(mask),
            });
            println!("{}", serde_json::to_string_pretty(&shown)?);
            Ok(())
        }
        ConfigCommands::Set { base_url, token } => {
            if base_url.is_none() && token.is_none() {
                bail!("nothing to set; pass --base-url and/or --token");
            }
            if let Some(url) = base_url {
                reqwest::Url::parse(&url).with_context(|| format!("Invalid URL: {}", url))?;
                cfg.base_url = Some(url);
            }
            if let Some(token) = token {
                cfg.token = Some(token).filter(|t| !t.is_empty());
            }
            cfg.save(path)?;
            println!("Saved {:?}", path);
            Ok(())
        }
    }
}

fn node_path(node: &str, action: &str) -> String {
    format!("/api/nodes/{}/{}", segment(node), action)
}

/// Request body for push-certs: each file's basename and base64 content.
fn certs_body(files: &[PathBuf], target_dir: Option<&str>) -> Result<Value> {
    let mut encoded = Vec::with_capacity(files.len());
    for path in files {
        let bytes = std::fs::read(path).with_context(|| format!("Failed to read {:?}", path))?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .with_context(|| format!("Invalid file name: {:?}", path))?;
        encoded.push(json!({
            "name": name,
            "contentBase64": BASE64_STANDARD.encode(bytes),
        }));
    }

    let mut body = json!({ "files": encoded });
    if let Some(dir) = target_dir {
        body["targetDir"] = json!(dir);
    }
    Ok(body)
}

fn write_output(content: &str, output: Option<&Path>) -> Result<()> {
    match output {
        Some(path) => {
            std::fs::write(path, content).with_context(|| format!("Failed to write {:?}", path))
        }
        None => {
            print!("{}", content);
            Ok(())
        }
    }
}
