pub mod brute_force;
pub mod cli;
pub mod config;
pub mod display;
pub mod error;
pub mod event;
pub mod event_tree;
pub mod logging;
pub mod objective;
pub mod optimizer;
pub mod symmetry;
pub mod tree_opt;
pub mod tree_splitter;
