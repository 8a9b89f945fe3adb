use std::process::exit;

use rhi::config::RendererSettings;
use rhi::error::report_fatal;
use rhi::Engine;

fn main() {
    pretty_env_logger::init();

    let settings = match RendererSettings::load() {
        Ok(settings) => settings,
        Err(error) => {
            report_fatal(&error.into());
            exit(1);
        }
    };

    if let Err(error) = Engine::new(settings).and_then(Engine::run) {
        report_fatal(&error);
        exit(1);
    }
}
