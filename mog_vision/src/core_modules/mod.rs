pub mod engine;
pub mod mixture;
pub mod model_store;
