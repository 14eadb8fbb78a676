#![warn(clippy::pedantic)]
#![allow(clippy::uninlined_format_args)]

use anyhow::{bail, Context, Result};
use argh::FromArgs;
use env_logger::Env;
use procstream::{parse_number, NativeMemory, RemoteMemoryStream};
use read_process_memory::Pid;
use std::fmt::Write as _;
use std::io::SeekFrom;

const PAGE_SIZE: usize = 4096;

#[derive(FromArgs)]
/// Read and write the memory of a running process by address.
struct Args {
    /// enable verbose logging output
    #[argh(switch, short = 'v')]
    verbose: bool,

    #[argh(subcommand)]
    command: Command,
}

#[derive(FromArgs)]
#[argh(subcommand)]
enum Command {
    Read(ReadArgs),
    Write(WriteArgs),
}

#[derive(FromArgs)]
/// Print a hex dump of target memory.
#[argh(subcommand, name = "read")]
struct ReadArgs {
    /// process ID of the target
    #[argh(positional)]
    pid: Pid,

    /// address to start at (0x-prefixed hex or decimal)
    #[argh(positional, from_str_fn(parse_number))]
    address: u64,

    /// number of bytes to read
    #[argh(positional, from_str_fn(parse_number))]
    count: u64,
}

#[derive(FromArgs)]
/// Write bytes into target memory and read them back.
#[argh(subcommand, name = "write")]
struct WriteArgs {
    /// process ID of the target
    #[argh(positional)]
    pid: Pid,

    /// address to start at (0x-prefixed hex or decimal)
    #[argh(positional, from_str_fn(parse_number))]
    address: u64,

    /// bytes to write as hex, e.g. 01020304
    #[argh(positional)]
    bytes: String,
}

fn main() -> Result<()> {
    let args: Args = argh::from_env();
    env_logger::Builder::from_env(Env::default().default_filter_or(if args.verbose {
        "procstream=debug"
    } else {
        "procstream=info"
    }))
    .init();

    match args.command {
        Command::Read(args) => {
            let mut stream = open(args.pid)?;
            read_paged(&mut stream, args.address, args.count, |address, bytes| {
                print!("{}", hex_dump(address, bytes));
            })?;
            stream.close()?;
        }
        Command::Write(args) => {
            let bytes = parse_hex(&args.bytes).map_err(anyhow::Error::msg)?;
            if bytes.is_empty() {
                bail!("nothing to write");
            }
            let mut stream = open(args.pid)?;
            stream.seek(SeekFrom::Start(args.address))?;
            stream.write(&bytes)?;
            log::info!(
                "wrote {} bytes at {:#x} in pid {}",
                bytes.len(),
                args.address,
                args.pid
            );
            verify(&mut stream, args.address, &bytes)?;
            stream.close()?;
        }
    }
    Ok(())
}

#[cfg(any(target_os = "linux", windows))]
fn open(pid: Pid) -> Result<RemoteMemoryStream<procstream::ProcessHandle>> {
    let handle = procstream::ProcessHandle::open(pid)
        .with_context(|| format!("failed to open pid {}", pid))?;
    Ok(RemoteMemoryStream::owned(handle, procstream::Access::ReadWrite))
}

#[cfg(not(any(target_os = "linux", windows)))]
fn open(
    pid: Pid,
) -> Result<RemoteMemoryStream<procstream::CopyHandle<read_process_memory::ProcessHandle>>> {
    let handle = read_process_memory::ProcessHandle::try_from(pid)
        .with_context(|| format!("failed to open pid {} (are you running as root?)", pid))?;
    Ok(RemoteMemoryStream::owned(
        procstream::CopyHandle::new(handle),
        procstream::Access::Read,
    ))
}

/// Read `count` bytes at `address` one page at a time, handing each page to `sink`.
fn read_paged<H: NativeMemory>(
    stream: &mut RemoteMemoryStream<H>,
    address: u64,
    count: u64,
    mut sink: impl FnMut(u64, &[u8]),
) -> Result<()> {
    let end = address.checked_add(count).context("range overflows the address space")?;
    let mut buf = [0; PAGE_SIZE];
    stream.seek(SeekFrom::Start(address))?;
    while stream.position() < end {
        let at = stream.position();
        let len = usize::try_from(end - at).map_or(PAGE_SIZE, |left| left.min(PAGE_SIZE));
        stream.read(&mut buf[..len])?;
        sink(at, &buf[..len]);
    }
    Ok(())
}

fn verify<H: NativeMemory>(
    stream: &mut RemoteMemoryStream<H>,
    address: u64,
    expected: &[u8],
) -> Result<()> {
    let mut actual = vec![0; expected.len()];
    stream.seek(SeekFrom::Start(address))?;
    stream.read(&mut actual)?;
    print!("{}", hex_dump(address, &actual));
    if actual != expected {
        bail!("read-back at {:#x} does not match what was written", address);
    }
    Ok(())
}

fn parse_hex(s: &str) -> Result<Vec<u8>, String> {
    let digits: Vec<u8> = s
        .bytes()
        .filter(|b| !b.is_ascii_whitespace() && *b != b'_')
        .collect();
    if digits.len() % 2 != 0 {
        return Err(format!("odd number of hex digits in {:?}", s));
    }
    digits
        .chunks(2)
        .map(|pair| {
            std::str::from_utf8(pair)
                .ok()
                .and_then(|pair| u8::from_str_radix(pair, 16).ok())
                .ok_or_else(|| format!("invalid hex byte in {:?}", s))
        })
        .collect()
}

fn hex_dump(address: u64, bytes: &[u8]) -> String {
    let mut out = String::new();
    for (line, chunk) in (address..).step_by(16).zip(bytes.chunks(16)) {
        write!(out, "{:016x} ", line).unwrap();
        for i in 0..16 {
            match chunk.get(i) {
                Some(byte) => write!(out, " {:02x}", byte).unwrap(),
                None => out.push_str("   "),
            }
        }
        out.push_str("  |");
        out.extend(chunk.iter().map(|&b| {
            if b.is_ascii_graphic() || b == b' ' {
                b as char
            } else {
                '.'
            }
        }));
        out.push_str("|\n");
    }
    out
}
