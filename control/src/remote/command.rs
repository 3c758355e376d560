//! Remote command templates.
//!
//! Every composite step run on a node is rendered from a [`RemoteCommand`]
//! whose path arguments have already passed [`sanitize_filename`] or
//! [`sanitize_remote_dir`], and are single-quoted on interpolation.

use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

use crate::error::FleetError;

fn is_safe_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | '@' | '+')
}

/// Reduce `name` to its basename and reject anything a shell could interpret.
pub fn sanitize_filename(name: &str) -> Result<String, FleetError> {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();

    if base.is_empty() || base == "." || base == ".." {
        return Err(FleetError::Validation(format!("invalid filename: {:?}", name)));
    }
    if base.starts_with('-') || !base.chars().all(is_safe_name_char) {
        return Err(FleetError::Validation(format!(
            "filename contains unsupported characters: {:?}",
            name
        )));
    }
    Ok(base.to_string())
}

/// Validate an absolute remote directory such as a certificate target.
pub fn sanitize_remote_dir(dir: &str) -> Result<String, FleetError> {
    let invalid = || FleetError::Validation(format!("invalid remote directory: {:?}", dir));

    if !dir.starts_with('/') {
        return Err(invalid());
    }
    if !dir.chars().all(|c| c == '/' || is_safe_name_char(c)) {
        return Err(invalid());
    }
    if dir.split('/').any(|segment| segment == "..") {
        return Err(invalid());
    }

    let trimmed = dir.trim_end_matches('/');
    Ok(if trimmed.is_empty() { "/".to_string() } else { trimmed.to_string() })
}

/// POSIX single-quote `arg`.
pub fn quote(arg: &str) -> String {
    format!("'{}'", arg.replace('\'', r"'\''"))
}

pub fn join_remote(dir: &str, name: &str) -> String {
    if dir.ends_with('/') {
        format!("{}{}", dir, name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// A staging path that does not collide across concurrent invocations.
pub fn remote_tmp_path(tmp_dir: &str, name: &str) -> String {
    let millis = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    let suffix = &Uuid::new_v4().simple().to_string()[..8];
    join_remote(tmp_dir, &format!("{}.{}.{}", name, millis, suffix))
}

/// Wrap a command for the passwordless privilege escalation nodes provide.
pub fn privileged(command: &str) -> String {
    format!("sudo -n sh -c {}", quote(command))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteCommand<'a> {
    /// Move a staged upload into place, owned by root with mode 0644.
    Install {
        staged: &'a str,
        dest: &'a str,
        /// Directory to create first, if any.
        create_dir: Option<&'a str>,
    },
    /// Symlink sites-enabled to sites-available unless already enabled.
    EnableSite {
        available: &'a str,
        enabled: &'a str,
    },
    /// `nginx -t`
    TestConfig,
    /// Reload through systemd, falling back to signalling nginx directly.
    Reload,
}

impl RemoteCommand<'_> {
    pub fn render(&self) -> String {
        match self {
            RemoteCommand::Install {
                staged,
                dest,
                create_dir,
            } => {
                let dest = quote(dest);
                let install = format!(
                    "mv {} {} && chown root:root {} && chmod 644 {}",
                    quote(staged),
                    dest,
                    dest,
                    dest
                );
                match create_dir {
                    Some(dir) => format!("mkdir -p {} && {}", quote(dir), install),
                    None => install,
                }
            }
            RemoteCommand::EnableSite { available, enabled } => {
                let available = quote(available);
                let enabled = quote(enabled);
                format!(
                    "test -f {} && {{ test -e {} || ln -sfn {} {}; }}",
                    available, enabled, available, enabled
                )
            }
            RemoteCommand::TestConfig => "nginx -t".to_string(),
            RemoteCommand::Reload => "systemctl reload nginx || nginx -s reload".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_strips_directories() {
        assert_eq!(sanitize_filename("site.conf").unwrap(), "site.conf");
        assert_eq!(sanitize_filename("../../etc/passwd").unwrap(), "passwd");
        assert_eq!(sanitize_filename("/etc/nginx/x.conf").unwrap(), "x.conf");
        assert_eq!(sanitize_filename("a\\b.conf").unwrap(), "b.conf");
    }

    #[test]
    fn test_sanitize_rejects_metacharacters() {
        for bad in [
            "",
            ".",
            "..",
            "dir/",
            "a b.conf",
            "x;rm -rf /",
            "$(reboot).conf",
            "a'b",
            "`id`",
            "-rf",
            "a|b",
        ] {
            assert!(
                matches!(sanitize_filename(bad), Err(FleetError::Validation(_))),
                "{:?} should be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_sanitize_remote_dir() {
        assert_eq!(sanitize_remote_dir("/etc/ssl/nginx/").unwrap(), "/etc/ssl/nginx");
        assert_eq!(sanitize_remote_dir("/").unwrap(), "/");
        assert!(sanitize_remote_dir("etc/ssl").is_err());
        assert!(sanitize_remote_dir("/etc/../root").is_err());
        assert!(sanitize_remote_dir("/etc/ssl nginx").is_err());
        assert!(sanitize_remote_dir("/etc;reboot").is_err());
    }

    #[test]
    fn test_quote() {
        assert_eq!(quote("plain"), "'plain'");
        assert_eq!(quote("it's"), r"'it'\''s'");
    }

    #[test]
    fn test_tmp_paths_are_unique() {
        let a = remote_tmp_path("/tmp", "site.conf");
        let b = remote_tmp_path("/tmp", "site.conf");
        assert_ne!(a, b);
        assert!(a.starts_with("/tmp/site.conf."));
    }

    #[test]
    fn test_render_install() {
        let cmd = RemoteCommand::Install {
            staged: "/tmp/a.conf.1.abc",
            dest: "/etc/nginx/sites-available/a.conf",
            create_dir: None,
        };
        assert_eq!(
            cmd.render(),
            "mv '/tmp/a.conf.1.abc' '/etc/nginx/sites-available/a.conf' && \
             chown root:root '/etc/nginx/sites-available/a.conf' && \
             chmod 644 '/etc/nginx/sites-available/a.conf'"
        );

        let with_dir = RemoteCommand::Install {
            staged: "/tmp/c.pem.1.abc",
            dest: "/etc/ssl/nginx/c.pem",
            create_dir: Some("/etc/ssl/nginx"),
        };
        assert!(with_dir.render().starts_with("mkdir -p '/etc/ssl/nginx' && mv "));
    }

    #[test]
    fn test_render_enable_site() {
        let cmd = RemoteCommand::EnableSite {
            available: "/etc/nginx/sites-available/a.conf",
            enabled: "/etc/nginx/sites-enabled/a.conf",
        };
        assert_eq!(
            cmd.render(),
            "test -f '/etc/nginx/sites-available/a.conf' && \
             { test -e '/etc/nginx/sites-enabled/a.conf' || \
             ln -sfn '/etc/nginx/sites-available/a.conf' '/etc/nginx/sites-enabled/a.conf'; }"
        );
    }

    #[test]
    fn test_privileged_wraps_in_sudo() {
        assert_eq!(privileged("nginx -t"), "sudo -n sh -c 'nginx -t'");
    }
}
