use clap::Parser;
use mdns_discovery::config::{Args, Config};
use mdns_discovery::discovery::{Discovered, Discovery, ServiceWatcher};
use mdns_discovery::registry::ServiceHandle;
use tracing::{error, info, warn};

fn report(found: &Discovered) {
    println!("{}\t{}\t{}", found.name, found.ip, found.port);
}

#[tokio::main]
async fn main() {
    // Parse command-line arguments
    let args = Args::parse();

    if args.print_example_config {
        Config::print_example_config();
        return;
    }

    // Load configuration
    let config = match Config::load(args) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    // Initialize tracing/logging with configured level
    tracing_subscriber::fmt()
        .with_max_level(config.parse_log_level())
        .init();

    info!("Starting mDNS discovery");
    info!(
        "Configuration: port={}, service_type={}, autodiscover={}, services={}",
        config.mdns.port,
        config.discovery.service_type,
        config.discovery.autodiscover,
        config.services.len()
    );

    let discovery = match Discovery::new(config.transport_options()) {
        Ok(d) => d,
        Err(e) => {
            error!("Failed to create mDNS transport: {}", e);
            return;
        }
    };

    {
        let transport_errors = discovery.transport().events();
        transport_errors.error.subscribe(|e| error!("mDNS socket error: {}", e));
        transport_errors.warning.subscribe(|e| warn!("mDNS: {}", e));
    }

    for target in &config.discovery.targets {
        info!("Configured target {} at {}:{}", target.name, target.ip, target.port);
        report(&Discovered {
            name: target.name.clone(),
            ip: target.ip,
            port: target.port,
        });
    }

    let mut handles: Vec<ServiceHandle> = Vec::new();
    for service in config.services_to_publish() {
        let name = service.name.clone();
        match discovery.publish(service) {
            Ok(handle) => {
                let fqdn = handle.fqdn().to_string();
                handle.on_up(move |_| info!("Service {} is up", fqdn));
                handle.on_error(|e| warn!("{}", e));
                handles.push(handle);
            }
            Err(e) => error!("Failed to publish {}: {}", name, e),
        }
    }

    let mut idle = None;
    let watcher = if config.discovery.autodiscover {
        match ServiceWatcher::start(discovery, config.watcher_options(), report).await {
            Ok(w) => Some(w),
            Err(e) => {
                error!("Failed to start discovery: {}", e);
                return;
            }
        }
    } else {
        info!("Autodiscovery disabled");
        idle = Some(discovery);
        None
    };

    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("Shutting down"),
        Err(e) => error!("Failed to listen for shutdown signal: {}", e),
    }

    let session = watcher.as_ref().map(ServiceWatcher::discovery).or(idle.as_ref());
    if let Some(session) = session {
        if let Err(e) = session.unpublish_all().await {
            warn!("Failed to unpublish services: {}", e);
        }
    }
    drop(handles);

    match (watcher, idle) {
        (Some(watcher), _) => watcher.stop().await,
        (None, Some(discovery)) => discovery.destroy().await,
        (None, None) => {}
    }
}
