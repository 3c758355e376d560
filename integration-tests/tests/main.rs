mod common;

mod cluster_fanout;
mod config_push;
