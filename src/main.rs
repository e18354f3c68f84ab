use std::path::PathBuf;

use pbr_viewer::{app, config::ViewerConfig};

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    // pbr-viewer [config.toml] [scene-path]
    let mut args = std::env::args().skip(1);
    let config_path = args.next().map(PathBuf::from);
    let scene = args.next();

    let result = ViewerConfig::load_or_default(config_path.as_deref())
        .map_err(app::ViewerError::from)
        .and_then(|config| app::run(config, scene));
    if let Err(error) = result {
        log::error!("{error}");
        std::process::exit(1);
    }
}
