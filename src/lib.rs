pub mod app;
pub mod assets;
pub mod camera;
pub mod config;
pub mod ibl;
pub mod render_context;
pub mod renderer;
pub mod scene;
