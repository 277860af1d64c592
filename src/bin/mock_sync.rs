//! Mock sync binary for integration testing
//!
//! Implements the subject command line with a one-shot server to client
//! mirror over a single TCP connection, so the harness can be exercised
//! without a real sync tool.
//!
//! Wire format: one JSON manifest line, then the raw bytes of every file in
//! manifest order.
//!
//! `MOCK_SYNC_FAULT=error` makes the server report an error while still
//! mirroring. `MOCK_SYNC_FAULT=stale` makes the client keep entries the
//! server does not have.

use std::collections::BTreeSet;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpListener, TcpStream};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;
use serde::{Deserialize, Serialize};
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "mock-sync", about = "Mirror a directory from server to client")]
struct Args {
    /// Serve the directory on this port
    #[arg(short = 'd', conflicts_with = "server")]
    port: Option<u16>,

    /// Mirror from the server at host:port into the directory
    #[arg(short = 's')]
    server: Option<String>,

    /// Connection attempts before giving up
    #[arg(short = 'r')]
    retries: Option<u32>,

    /// Directory to serve or mirror into
    dir: PathBuf,
}

#[derive(Serialize, Deserialize, Debug, Default)]
struct Manifest {
    dirs: Vec<String>,
    files: Vec<FileEntry>,
}

#[derive(Serialize, Deserialize, Debug)]
struct FileEntry {
    path: String,
    size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fault {
    None,
    Error,
    Stale,
}

impl Fault {
    fn from_env() -> Self {
        match std::env::var("MOCK_SYNC_FAULT").as_deref() {
            Ok("error") => Fault::Error,
            Ok("stale") => Fault::Stale,
            _ => Fault::None,
        }
    }
}

const DEFAULT_ATTEMPTS: u32 = 50;
const RETRY_DELAY: Duration = Duration::from_millis(100);

fn main() -> ExitCode {
    let args = Args::parse();
    let fault = Fault::from_env();

    let result = match (args.port, &args.server) {
        (Some(port), None) => serve(port, &args.dir, fault),
        (None, Some(addr)) => mirror(
            addr,
            &args.dir,
            args.retries.unwrap_or(DEFAULT_ATTEMPTS).max(1),
            fault,
        ),
        _ => Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "exactly one of -d <port> or -s <host:port> is required",
        )),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

/// Accept one client, send the tree, wait for the client to hang up
fn serve(port: u16, dir: &Path, fault: Fault) -> io::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port))?;
    println!("Server is active and waiting for connections...");

    let (mut stream, peer) = listener.accept()?;
    println!("Client connected from {}", peer);

    if fault == Fault::Error {
        eprintln!("ERROR: simulated checksum failure");
    }

    let manifest = scan(dir)?;
    let mut header = serde_json::to_vec(&manifest)?;
    header.push(b'\n');
    stream.write_all(&header)?;

    for entry in &manifest.files {
        let mut file = std::fs::File::open(local_path(dir, &entry.path))?;
        let sent = io::copy(&mut (&mut file).take(entry.size), &mut stream)?;
        if sent != entry.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} changed size while sending", entry.path),
            ));
        }
        println!("sent {} ({} bytes)", entry.path, entry.size);
    }
    stream.flush()?;
    stream.shutdown(std::net::Shutdown::Write)?;

    // Hold the connection until the client has read everything
    let mut rest = Vec::new();
    let _ = stream.read_to_end(&mut rest);

    println!(
        "Served {} files and {} directories",
        manifest.files.len(),
        manifest.dirs.len()
    );
    Ok(())
}

/// Pull the server's tree into `dir`, asking before deleting extras
fn mirror(addr: &str, dir: &Path, attempts: u32, fault: Fault) -> io::Result<()> {
    let stream = connect(addr, attempts)?;
    println!("Connected to {}", addr);

    let mut reader = BufReader::new(stream);
    let mut header = String::new();
    if reader.read_line(&mut header)? == 0 {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            "server closed before sending a manifest",
        ));
    }
    let manifest: Manifest = serde_json::from_str(&header)?;

    for rel in &manifest.dirs {
        std::fs::create_dir_all(local_path(dir, rel))?;
    }

    for entry in &manifest.files {
        let path = local_path(dir, &entry.path);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = std::fs::File::create(&path)?;
        let received = io::copy(&mut (&mut reader).take(entry.size), &mut file)?;
        if received != entry.size {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("{} truncated at {} bytes", entry.path, received),
            ));
        }
        println!("transfer file {} ({} bytes)", entry.path, entry.size);
    }

    let extras = extras(dir, &manifest)?;
    if !extras.is_empty() {
        print!(
            "Remove {} local entries not present on server? (y/n) ",
            extras.len()
        );
        io::stdout().flush()?;

        let mut answer = String::new();
        io::stdin().read_line(&mut answer)?;
        println!();

        if answer.trim().eq_ignore_ascii_case("y") && fault != Fault::Stale {
            remove_all(dir, &extras)?;
            println!("Removed {} local entries", extras.len());
        } else {
            println!("Kept {} local entries", extras.len());
        }
    }

    println!("sync complete");
    Ok(())
}

fn connect(addr: &str, attempts: u32) -> io::Result<TcpStream> {
    let mut last = None;
    for _ in 0..attempts {
        match TcpStream::connect(addr) {
            Ok(stream) => return Ok(stream),
            Err(e) => {
                last = Some(e);
                std::thread::sleep(RETRY_DELAY);
            }
        }
    }
    Err(last.unwrap_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no attempts made")))
}

/// Every directory and regular file under `dir`, as "/"-joined paths
fn scan(dir: &Path) -> io::Result<Manifest> {
    let mut manifest = Manifest::default();
    for entry in WalkDir::new(dir).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let rel = relative(dir, entry.path());
        if entry.file_type().is_dir() {
            manifest.dirs.push(rel);
        } else if entry.file_type().is_file() {
            let size = entry.metadata().map_err(io::Error::other)?.len();
            manifest.files.push(FileEntry { path: rel, size });
        }
    }
    Ok(manifest)
}

/// Local entries the manifest does not mention
fn extras(dir: &Path, manifest: &Manifest) -> io::Result<Vec<String>> {
    let wanted: BTreeSet<&str> = manifest
        .dirs
        .iter()
        .map(String::as_str)
        .chain(manifest.files.iter().map(|f| f.path.as_str()))
        .collect();

    let local = scan(dir)?;
    Ok(local
        .dirs
        .into_iter()
        .chain(local.files.into_iter().map(|f| f.path))
        .filter(|rel| !wanted.contains(rel.as_str()))
        .collect())
}

fn remove_all(dir: &Path, rels: &[String]) -> io::Result<()> {
    // Deepest paths first so directories are empty by the time we reach them
    let mut rels: Vec<&String> = rels.iter().collect();
    rels.sort_by_key(|rel| std::cmp::Reverse(rel.matches('/').count()));

    for rel in rels {
        let path = local_path(dir, rel);
        let result = if path.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        match result {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}

fn relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

fn local_path(root: &Path, rel: &str) -> PathBuf {
    rel.split('/').fold(root.to_path_buf(), |path, part| path.join(part))
}
