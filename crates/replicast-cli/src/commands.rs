use std::collections::BTreeMap;
use std::fs;
use std::net::{Ipv4Addr, SocketAddr};
use std::path::Path;
use std::sync::Arc;

use anyhow::{ensure, Context};
use colored::Colorize;
use md5::{Digest, Md5};
use rand::Rng;
use replicast_cache::ReplicaCache;
use replicast_receiver::Receiver;
use replicast_server::ReplicastServer;
use replicast_types::{now_ms, props, VersionId};
use replicast_wire::FragmentEncoder;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::cli::*;
use crate::settings::Settings;

pub async fn run_command(cli: Cli) -> anyhow::Result<()> {
    match cli.command {
        Command::Serve(args) => cmd_serve(args).await,
        Command::Publish(args) => cmd_publish(args).await,
        Command::CheckConfig(args) => cmd_check_config(args, cli.format),
    }
}

fn serve_settings(args: &ServeArgs) -> anyhow::Result<Settings> {
    let mut settings = match &args.config {
        Some(path) => Settings::load(path)?,
        None => Settings::default(),
    };
    if let Some(bind) = args.bind {
        settings.server.bind_addr = bind;
    }
    if let Some(unicast) = args.unicast {
        settings.receiver.unicast_bind = Some(unicast);
    }
    if let Some(url) = &args.recovery_url {
        settings.receiver.recovery.base_url = Some(url.clone());
    }
    settings.receiver.validate()?;
    Ok(settings)
}

async fn cmd_serve(args: ServeArgs) -> anyhow::Result<()> {
    let settings = serve_settings(&args)?;
    let cache = Arc::new(ReplicaCache::new());
    let receiver = Receiver::start(settings.receiver.clone(), cache.clone()).await?;

    println!("{} replicast node running", "✓".green().bold());
    if let Some(addr) = receiver.multicast_addr() {
        println!("  Multicast: {}", addr.to_string().cyan());
    }
    if let Some(addr) = receiver.unicast_addr() {
        println!("  Unicast:   {}", addr.to_string().cyan());
    }
    match (&settings.receiver.recovery.base_url, receiver.recovery_queue()) {
        (Some(url), Some(_)) => println!("  Recovery:  {}", url.yellow()),
        _ => println!("  Recovery:  {}", "disabled".dimmed()),
    }
    println!("  HTTP:      {}", settings.server.bind_addr.to_string().bold());

    let cancel = CancellationToken::new();
    let server = ReplicastServer::new(settings.server.clone(), cache);
    let mut http = tokio::spawn(server.serve(cancel.clone()));

    let finished_early = tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("waiting for ctrl-c")?;
            info!("shutdown requested");
            None
        }
        result = &mut http => Some(result),
    };

    cancel.cancel();
    receiver.shutdown().await;
    let result = match finished_early {
        Some(result) => result,
        None => http.await,
    };
    result.context("HTTP server task panicked")??;
    println!("{} stopped", "✓".green());
    Ok(())
}

/// Properties sent with a published file.
fn publish_properties(args: &PublishArgs, payload: &[u8], created: u64) -> BTreeMap<String, String> {
    let mut properties: BTreeMap<String, String> = args.properties.iter().cloned().collect();
    properties.insert(props::VALID_FROM.into(), args.valid_from.to_string());
    if let Some(until) = args.valid_until {
        properties.insert(props::VALID_UNTIL.into(), until.to_string());
    }
    properties.insert(props::CREATED.into(), created.to_string());
    properties.insert(props::CONTENT_MD5.into(), hex::encode(Md5::digest(payload)));
    if let Some(content_type) = &args.content_type {
        properties.insert(props::CONTENT_TYPE.into(), content_type.clone());
    }
    if let Some(name) = args.file.file_name().and_then(|n| n.to_str()) {
        properties.insert(props::ORIGINAL_FILE_NAME.into(), name.to_string());
    }
    properties
}

fn local_bind_for(target: SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from((Ipv4Addr::UNSPECIFIED, 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}

async fn cmd_publish(args: PublishArgs) -> anyhow::Result<()> {
    ensure!(
        (0.0..=1.0).contains(&args.drop_rate),
        "--drop-rate must be between 0 and 1"
    );
    if let Some(until) = args.valid_until {
        ensure!(until > args.valid_from, "--valid-until must be after --valid-from");
    }
    let payload = read_payload(&args.file)?;
    let properties = publish_properties(&args, &payload, now_ms());
    let version = VersionId::new();
    let datagrams = FragmentEncoder::new(args.fragment_size)
        .datagrams(&args.key, version, &properties, &payload)?;

    let drops: Vec<bool> = {
        let mut rng = rand::thread_rng();
        datagrams.iter().map(|_| rng.gen_bool(args.drop_rate)).collect()
    };

    let socket = UdpSocket::bind(local_bind_for(args.target)).await?;
    if args.target.is_ipv4() && args.target.ip().is_multicast() {
        socket.set_multicast_ttl_v4(args.ttl)?;
    }
    let mut sent = 0usize;
    for (datagram, drop) in datagrams.iter().zip(drops) {
        if drop {
            continue;
        }
        socket
            .send_to(datagram, args.target)
            .await
            .with_context(|| format!("sending to {}", args.target))?;
        sent += 1;
    }

    println!("{} Published {}", "✓".green().bold(), args.key.bold());
    println!("  Version:   {}", version.to_string().yellow());
    println!("  Size:      {} bytes", payload.len());
    println!("  Datagrams: {sent}/{} sent to {}", datagrams.len(), args.target.to_string().cyan());
    if sent < datagrams.len() {
        println!("  {} {} dropped on purpose", "!".yellow(), datagrams.len() - sent);
    }
    Ok(())
}

fn read_payload(path: &Path) -> anyhow::Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

fn cmd_check_config(args: CheckConfigArgs, format: OutputFormat) -> anyhow::Result<()> {
    let settings = Settings::load(&args.config)?;
    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&settings)?);
        return Ok(());
    }

    let receiver = &settings.receiver;
    println!("{} {} is valid", "✓".green().bold(), args.config.display());
    match receiver.multicast_group {
        Some(group) => println!("  Multicast: {group}:{}", receiver.multicast_port),
        None => println!("  Multicast: {}", "disabled".dimmed()),
    }
    match receiver.unicast_bind {
        Some(addr) => println!("  Unicast:   {addr}"),
        None => println!("  Unicast:   {}", "disabled".dimmed()),
    }
    if receiver.any_listener() && receiver.recovery.enabled() {
        println!(
            "  Recovery:  {} (grace {} ms)",
            receiver.recovery.base_url.as_deref().unwrap_or_default().yellow(),
            receiver.recovery.grace_ms
        );
    } else {
        println!("  Recovery:  {}", "disabled".dimmed());
    }
    println!("  Workers:   {}", receiver.worker_count());
    println!("  Max object: {} bytes", receiver.max_object_size);
    println!("  HTTP:      {}", settings.server.bind_addr);
    if !receiver.any_listener() {
        println!("  {} no UDP listener configured", "!".yellow());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn publish_args(argv: &[&str]) -> PublishArgs {
        let mut full = vec!["replicast", "publish"];
        full.extend_from_slice(argv);
        match Cli::try_parse_from(full).unwrap().command {
            Command::Publish(args) => args,
            _ => panic!("wrong command"),
        }
    }

    #[test]
    fn publish_properties_cover_object() {
        let args = publish_args(&[
            "/data/gain.bin",
            "-k",
            "DET/A",
            "--valid-from",
            "1000",
            "--valid-until",
            "2000",
            "--content-type",
            "text/plain",
            "-p",
            "run=7",
        ]);
        let p = publish_properties(&args, b"abc", 55);
        assert_eq!(p[props::VALID_FROM], "1000");
        assert_eq!(p[props::VALID_UNTIL], "2000");
        assert_eq!(p[props::CREATED], "55");
        assert_eq!(p[props::CONTENT_MD5], "900150983cd24fb0d6963f7d28e17f72");
        assert_eq!(p[props::CONTENT_TYPE], "text/plain");
        assert_eq!(p[props::ORIGINAL_FILE_NAME], "gain.bin");
        assert_eq!(p["run"], "7");
    }

    #[test]
    fn flags_override_file_settings() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, b"[server]\nbind_addr = \"127.0.0.1:1\"\n").unwrap();
        let path = file.path().to_str().unwrap().to_string();
        let cli = Cli::try_parse_from([
            "replicast",
            "serve",
            "-c",
            &path,
            "--bind",
            "127.0.0.1:2",
            "--unicast",
            "127.0.0.1:0",
        ])
        .unwrap();
        let Command::Serve(args) = cli.command else {
            panic!("wrong command");
        };
        let settings = serve_settings(&args).unwrap();
        assert_eq!(settings.server.bind_addr.port(), 2);
        assert!(settings.receiver.any_listener());
    }

    #[tokio::test]
    async fn publish_reaches_unicast_socket() {
        let listener = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let target = listener.local_addr().unwrap().to_string();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        std::io::Write::write_all(&mut file, &[7u8; 3000]).unwrap();
        let path = file.path().to_str().unwrap().to_string();

        let args = publish_args(&[&path, "-k", "DET/A", "-t", &target, "--fragment-size", "1000"]);
        cmd_publish(args).await.unwrap();

        let mut buf = vec![0u8; 65_536];
        let (n, _) = listener.recv_from(&mut buf).await.unwrap();
        assert!(n > 0);
    }

    #[tokio::test]
    async fn publish_rejects_bad_drop_rate() {
        let args = publish_args(&["x.bin", "-k", "K", "--drop-rate", "1.5"]);
        assert!(cmd_publish(args).await.is_err());
    }
}
