pub mod app;
pub mod batch;
pub mod catalog;
pub mod config;
pub mod configuration;
pub mod domain;
pub mod error;
pub mod fs_util;
pub mod http;
pub mod interpro;
pub mod merge;
pub mod output;
pub mod plan;
pub mod record;
pub mod reference;
pub mod store;
pub mod table;
pub mod taxonomy;
pub mod transform;
pub mod uniprot;
