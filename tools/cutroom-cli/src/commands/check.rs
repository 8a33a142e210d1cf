//! Check which render strategies this host can run.

use cutroom_common::config::{config_file_path, AppConfig};
use cutroom_render_engine::codec::CodecBackend;
use cutroom_render_engine::filter_graph::transcoder::Transcoder;
use cutroom_render_engine::RenderContext;

pub async fn run(config: &AppConfig) -> anyhow::Result<()> {
    println!("Cutroom Render Check");
    println!("{}", "=".repeat(50));
    println!("Config: {}", config_file_path().display());
    println!();

    let ctx = RenderContext::from_config(config);

    // Native service
    let service = ctx.native_service();
    let native_ok = match service.ensure_compatible().await {
        Ok(health) => {
            println!(
                "[OK] Native service: {} (version {}, {})",
                service.base_url(),
                health.version,
                health.status
            );
            true
        }
        Err(e) => {
            println!("[WARN] Native service: {e}");
            false
        }
    };

    // In-process codecs
    let codecs = ctx.codecs();
    let caps = codecs.capabilities();
    if caps.hardware_codecs {
        println!(
            "[OK] Codec backend: {} (encoder: {})",
            codecs.name(),
            caps.video_encoder.as_deref().unwrap_or("unknown")
        );
    } else {
        println!("[WARN] Codec backend: {} (streaming render disabled)", codecs.name());
    }

    // Text overlays
    match ctx.font() {
        Some(font) => println!("[OK] Font: {}", font.path.display()),
        None => println!("[WARN] Font: none found (text overlays need the transcoder)"),
    }

    // Transcoder
    let transcoder = Transcoder::new(&config.render.ffmpeg_path);
    let transcoder_ok = transcoder.is_available();
    if transcoder_ok {
        println!("[OK] Transcoder: {}", transcoder.program());
    } else {
        println!("[WARN] Transcoder: '{}' not found", transcoder.program());
    }

    println!();
    if native_ok || caps.hardware_codecs || transcoder_ok {
        println!("At least one render strategy is available. Cutroom is ready.");
    } else {
        println!("No render strategy is available. Install ffmpeg or start the native service.");
    }

    Ok(())
}
