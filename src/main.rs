use std::{net::SocketAddr, path::Path, sync::Arc};

use clap::Parser;
use color_eyre::{
    Result,
    eyre::{Context, eyre},
};
use rulegate::{
    ManifestValidator, ModuleRegistry, ProxyService,
    adapters::proxy_route,
    config::{Manifest, load_manifest},
    tracing_setup,
    utils::graceful_shutdown::GracefulShutdown,
};

#[derive(Parser, Debug)]
#[clap(author, version, about)]
struct Args {
    #[clap(subcommand)]
    command: Option<Commands>,

    #[clap(short, long, default_value = "manifest.yaml")]
    manifest: String,

    /// Address to listen on
    #[clap(short, long, default_value = "127.0.0.1:8000")]
    listen: String,

    /// Path prefix the proxy is mounted at
    #[clap(long, default_value = "/")]
    mount: String,

    /// Log as JSON lines
    #[clap(long)]
    json_logs: bool,

    /// Largest request body buffered for auditing, in bytes
    #[clap(long, default_value_t = rulegate::core::forwarder::DEFAULT_MAX_BODY_SIZE)]
    max_body_size: usize,

    /// Log level, overridden by RUST_LOG
    #[clap(long, default_value = "info")]
    log_level: String,
}

#[derive(Parser, Debug)]
enum Commands {
    /// Validate a manifest file
    Validate {
        /// Manifest file to validate
        #[clap(short, long, default_value = "manifest.yaml")]
        manifest: String,
    },
    /// Write a demo manifest
    Init {
        /// Output path for the new manifest
        #[clap(short, long, default_value = "manifest.yaml")]
        manifest: String,
    },
    /// Start the proxy (default)
    Serve {
        /// Manifest file to use
        #[clap(short, long, default_value = "manifest.yaml")]
        manifest: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;

    let args = Args::parse();

    let manifest_path = match &args.command {
        Some(Commands::Validate { manifest }) => return validate_manifest_command(manifest).await,
        Some(Commands::Init { manifest }) => return init_manifest_command(manifest).await,
        Some(Commands::Serve { manifest }) => manifest.clone(),
        None => args.manifest.clone(),
    };

    tracing_setup::init_tracing(&args.log_level, args.json_logs)
        .map_err(|e| eyre!("Failed to initialize tracing: {}", e))?;

    let provider = rustls::crypto::aws_lc_rs::default_provider();
    if let Err(e) = rustls::crypto::CryptoProvider::install_default(provider) {
        tracing::warn!(
            "CryptoProvider::install_default for aws-lc-rs reported an error: {:?}. \
            This can happen if a provider was already installed.",
            e
        );
    }

    tracing::info!("Loading manifest from {manifest_path}");
    let manifest: Manifest = load_manifest(&manifest_path)
        .await
        .with_context(|| format!("Failed to load manifest from {manifest_path}"))?;

    let proxy = Arc::new(
        ProxyService::builder(manifest)
            .max_body_size(args.max_body_size)
            .build()
            .context("Invalid manifest")?,
    );
    let app = proxy_route(&args.mount, proxy.clone());

    let addr: SocketAddr = args
        .listen
        .parse()
        .with_context(|| format!("Invalid listen address: {}", args.listen))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {addr}"))?;
    tracing::info!(
        "Proxying http://{}{} to {}",
        addr,
        args.mount,
        proxy.manifest().target
    );

    let graceful_shutdown = Arc::new(GracefulShutdown::new());
    let signal_handler_shutdown = graceful_shutdown.clone();
    tokio::spawn(async move {
        signal_handler_shutdown.run_signal_handler().await;
    });

    let shutdown_signal = graceful_shutdown.clone();
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let reason = shutdown_signal.wait_for_shutdown_signal().await;
        tracing::info!("Shutdown signal received: {:?}", reason);
    })
    .await
    .context("Server error")?;

    if graceful_shutdown.drain_audits(proxy.dispatcher()).await {
        tracing::info!("Graceful shutdown completed");
    }
    Ok(())
}

/// Validate a manifest file and exit
async fn validate_manifest_command(manifest_path: &str) -> Result<()> {
    println!("🔍 Validating manifest: {manifest_path}");

    if !Path::new(manifest_path).exists() {
        eprintln!("❌ Error: Manifest '{manifest_path}' not found");
        std::process::exit(1);
    }

    let manifest = match load_manifest(manifest_path).await {
        Ok(manifest) => {
            println!("✅ Manifest parsing: OK");
            manifest
        }
        Err(e) => {
            eprintln!("❌ Manifest parsing failed:");
            eprintln!("   {e:#}");
            std::process::exit(1);
        }
    };

    match ManifestValidator::validate(&manifest, &ModuleRegistry::with_builtins()) {
        Ok(()) => {
            println!("✅ Manifest validation: OK");
            println!();
            println!("📋 Manifest Summary:");
            println!("   • Target: {}", manifest.target);
            println!(
                "   • Roles Provider: {}",
                if manifest.roles_provider.is_some() {
                    "configured"
                } else {
                    "none (every request has no roles)"
                }
            );
            println!("   • Auditors: {}", manifest.auditors.len());
            println!("   • Route Rules: {}", manifest.route_rules.len());
            for rule in &manifest.route_rules {
                println!(
                    "     - {} {}",
                    if rule.allow { "allow" } else { "deny " },
                    rule
                );
            }
            println!();
            println!("🎉 Manifest is valid and ready to use!");
            Ok(())
        }
        Err(e) => {
            eprintln!("❌ Manifest validation failed:");
            eprintln!("{e}");
            println!();
            println!("💡 Common fixes:");
            println!("   • Ensure the target and service URLs start with http:// or https://");
            println!("   • Use \"*\" instead of an empty list to match anything");
            println!("   • Check module names against the registered modules (console, console-log)");
            std::process::exit(1);
        }
    }
}

/// Write the demo manifest
async fn init_manifest_command(manifest_path: &str) -> Result<()> {
    let path = Path::new(manifest_path);
    if path.exists() {
        eprintln!("❌ Error: Manifest '{manifest_path}' already exists");
        std::process::exit(1);
    }

    let demo_manifest = r#"# Rulegate manifest

# Base URL requests are forwarded to
target: "https://api.openai.com"

# Fixed roles, for trying things out. Use `module` or `service` for real lookups.
rolesProvider:
  as: ["domain:example.com"]

auditors:
  - kind: ["denied", "error", "aborted"]
    module: "console-log"
    params:
      log: "roles"

# Evaluated top to bottom, the first applicable rule wins
routeRules:
  - pattern: "/v1/files{/*}?"
    allow: false

  - pattern: "/v1/*"
    role: "domain:example.com"
    allow: true
    headers:
      Authorization: "Bearer ${OPENAI_API_KEY}"
      OpenAI-Organization: "${OPENAI_ORG_ID}"

  - pattern: "*"
    allow: false
"#;

    tokio::fs::write(path, demo_manifest)
        .await
        .context("Failed to write manifest file")?;
    println!("✅ Created demo manifest at: {manifest_path}");
    println!("   Run 'rulegate serve --manifest {manifest_path}' to start the proxy");
    Ok(())
}
