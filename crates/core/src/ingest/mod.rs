pub mod finviz;
pub mod provider;
pub mod types;
