pub mod app {
    pub mod cache;
    pub mod collect;
    pub mod context;
    pub mod derive;
    pub mod linker;
    pub mod offline;
    pub mod pagination;
    pub mod report;
    pub mod retry;
}

pub mod cli;
pub mod config;

pub mod domain {
    pub mod activity;
    pub mod identity;
    pub mod involvement;
    pub mod label;
    pub mod models;
    pub mod platform;
    pub mod references;
}

pub mod infra {
    pub mod blob_sqlite;
    pub mod github_client;
    pub mod gitlab_client;
    pub mod http;
}

pub mod ports;
