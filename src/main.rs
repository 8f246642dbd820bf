use crate::{
    cli::Args,
    discovery::SystemDiscovery,
    runner::{RunReport, Runner, Targets},
    settings::{Provider, Settings},
};
use clap::Parser;
use std::process::ExitCode;
use tracing::{error, info};

mod cli;
mod discovery;
mod dns;
mod reconciler;
mod runner;
mod settings;

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let args = Args::parse();

    if args.json {
        tracing::subscriber::set_global_default(tracing_subscriber::fmt().json().finish())?;
    } else {
        tracing::subscriber::set_global_default(tracing_subscriber::FmtSubscriber::new())?;
    }

    let cfg = match Settings::new(&args) {
        Ok(cfg) => cfg,
        Err(e) => {
            error!("bad settings: {}", e);
            return Ok(ExitCode::FAILURE);
        }
    };

    run(cfg).await
}

async fn run(cfg: Settings) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let targets = Targets::for_host(cfg.hostname.as_deref(), &cfg.domain_name)?;
    let discovery = SystemDiscovery::new(&cfg.discovery)?;

    match &cfg.provider {
        #[cfg(feature = "route53")]
        Provider::Route53(r53) => run_route53(&cfg, r53, discovery, targets).await,
        #[cfg(feature = "rfc2136")]
        Provider::Rfc2136(rfc) => run_rfc2136(&cfg, rfc, discovery, targets).await,
    }
}

#[cfg(feature = "route53")]
async fn run_route53(
    cfg: &Settings,
    r53: &settings::Route53Settings,
    discovery: SystemDiscovery,
    targets: Targets,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let aws_cfg = aws_config::load_from_env().await;
    let mut provider = dns::route53::Route53Provider::new(&aws_cfg, r53.hosted_zone_id.clone());
    *provider.ttl_mut() = cfg.ttl.into();
    *provider.timeout_mut() = cfg.timeout;

    let report = Runner::new(provider, discovery, targets).run().await;
    Ok(exit_code(&report))
}

#[cfg(feature = "rfc2136")]
async fn run_rfc2136(
    cfg: &Settings,
    rfc: &settings::Rfc2136Settings,
    discovery: SystemDiscovery,
    targets: Targets,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let mut provider = dns::rfc2136::Rfc2136Provider::new(rfc)?;
    *provider.ttl_mut() = cfg.ttl;
    *provider.timeout_mut() = cfg.timeout;
    info!(name_server = %rfc.name_server, signed = provider.is_signed(), "using rfc2136 provider");

    let report = Runner::new(provider, discovery, targets).run().await;
    Ok(exit_code(&report))
}

fn exit_code<E>(report: &RunReport<E>) -> ExitCode {
    if report.is_success() {
        info!("all records are up to date, {} written", report.updates());
        return ExitCode::SUCCESS;
    }

    if report.no_public_address() {
        error!("failed to get both public ip v4 and v6");
    } else {
        error!("{} record(s) could not be reconciled", report.failures());
    }
    ExitCode::FAILURE
}
