use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use jimeng_contracts::events::EventWriter;
use jimeng_contracts::materials::mime_for_filename;
use jimeng_contracts::models::{is_reference_model, ModelRegistry, VideoModelSpec};
use jimeng_engine::clock::{IdSource, RandomIds};
use jimeng_engine::{
    Collaborators, DirectBrowserProxy, GenerateRequest, HttpCreditService, HttpRpcCaller,
    HttpUploadTransport, InputFile, ServiceConfig, VideoGenerator,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "jimeng-rs", version, about = "Jimeng video generation client")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    Generate(GenerateArgs),
    Models,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    #[arg(long)]
    prompt: String,
    #[arg(long)]
    model: Option<String>,
    #[arg(long)]
    ratio: Option<String>,
    #[arg(long)]
    resolution: Option<String>,
    /// Seconds.
    #[arg(long)]
    duration: Option<u32>,
    /// Local path or http(s) URL; repeat in the order `@1`, `@2`, ... refer to.
    #[arg(long = "material")]
    materials: Vec<String>,
    /// Use the multi-material reference flow even for non-seedance models.
    #[arg(long)]
    reference: bool,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long, env = "JIMENG_SESSION_TOKEN", hide_env_values = true)]
    token: String,
}

fn main() {
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("jimeng-rs error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn run() -> Result<i32> {
    init_tracing();
    let cli = Cli::parse();
    match cli.command {
        Command::Generate(args) => run_generate(args),
        Command::Models => {
            let registry = ModelRegistry::default();
            for model in registry.models() {
                println!("{}\t{}\t{}", model.name, flow_label(model), model.req_key);
            }
            Ok(0)
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn flow_label(model: &VideoModelSpec) -> &'static str {
    if model.is_reference() {
        "reference"
    } else {
        "frame"
    }
}

fn is_remote(material: &str) -> bool {
    let lowered = material.trim_start().to_ascii_lowercase();
    lowered.starts_with("http://") || lowered.starts_with("https://")
}

fn read_material(material: &str) -> Result<InputFile> {
    if is_remote(material) {
        return Ok(InputFile::Url(material.trim().to_string()));
    }
    read_input(Path::new(material))
}

fn read_input(path: &Path) -> Result<InputFile> {
    let bytes = fs::read(path).with_context(|| format!("failed reading {}", path.display()))?;
    let filename = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned());
    let mime = filename
        .as_deref()
        .and_then(mime_for_filename)
        .map(str::to_string);
    Ok(InputFile::Bytes {
        bytes,
        filename,
        mime,
    })
}

fn run_generate(args: GenerateArgs) -> Result<i32> {
    let config = ServiceConfig::from_env();
    let rpc = Arc::new(HttpRpcCaller::new(config.clone()));
    let services = Collaborators {
        rpc: rpc.clone(),
        proxy: Arc::new(DirectBrowserProxy::new(config.clone())),
        credit: Arc::new(HttpCreditService::new(rpc)),
        transport: Arc::new(HttpUploadTransport::new(config.request_timeout)),
    };

    let files = args
        .materials
        .iter()
        .map(|material| read_material(material))
        .collect::<Result<Vec<_>>>()?;

    let request = GenerateRequest {
        model: args.model.clone(),
        prompt: args.prompt.clone(),
        ratio: args.ratio.clone(),
        resolution: args.resolution.clone(),
        duration_s: args.duration,
        files,
    };

    let mut generator = VideoGenerator::new(config, services);
    if let Some(path) = &args.events {
        let generation_id = RandomIds.uuid();
        info!(path = %path.display(), %generation_id, "recording generation events");
        generator = generator.with_events(EventWriter::new(path, generation_id));
    }

    let reference = args.reference || args.model.as_deref().is_some_and(is_reference_model);
    let url = if reference {
        generator.generate_reference_video(&args.token, &request)
    } else {
        generator.generate_video(&args.token, &request)
    }?;
    println!("{url}");
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn materials_keep_command_line_order() -> Result<()> {
        let temp = tempfile::tempdir()?;
        let image = temp.path().join("first.png");
        fs::write(&image, b"png")?;
        let args = [
            "jimeng-rs",
            "generate",
            "--prompt",
            "@1 meets @2 then @3",
            "--material",
            "https://cdn.example.com/clip.mp4",
            "--material",
            image.to_str().unwrap_or_default(),
            "--material",
            "HTTPS://cdn.example.com/voice.mp3",
            "--token",
            "t",
        ];
        let Command::Generate(parsed) = Cli::try_parse_from(args)?.command else {
            anyhow::bail!("expected generate");
        };
        let inputs = parsed
            .materials
            .iter()
            .map(|material| read_material(material))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(inputs[0], InputFile::Url("https://cdn.example.com/clip.mp4".to_string()));
        assert_eq!(
            inputs[1],
            InputFile::Bytes {
                bytes: b"png".to_vec(),
                filename: Some("first.png".to_string()),
                mime: Some("image/png".to_string()),
            }
        );
        assert_eq!(inputs[2], InputFile::Url("HTTPS://cdn.example.com/voice.mp3".to_string()));
        Ok(())
    }

    #[test]
    fn missing_local_material_names_the_path() {
        let err = read_material("/definitely/not/here.png").unwrap_err();
        assert!(format!("{err:#}").contains("/definitely/not/here.png"));
    }

    #[test]
    fn model_listing_marks_reference_models() {
        let registry = ModelRegistry::default();
        let labels: Vec<(&str, &str)> = registry
            .models()
            .map(|model| (model.name.as_str(), flow_label(model)))
            .collect();
        assert!(labels.contains(&("jimeng-video-3.0", "frame")));
        assert!(labels
            .iter()
            .any(|(name, flow)| name.contains("seedance") && *flow == "reference"));
    }
}
