pub mod audit;
pub mod classify;
pub mod config;
pub mod extract;
pub mod harvest;
pub mod paths;
pub mod reconcile;
pub mod state;
pub mod sync;
pub mod util;
pub mod warn;
