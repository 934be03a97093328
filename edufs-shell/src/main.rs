//! `edufs`: format or mount a host file as an `edufs` volume, then drive it from an
//! interactive, line-oriented command loop (spec §4.6, §6).

use edufs_core::error::Error;
use edufs_core::fs::{FormatOptions, MountOptions};
use edufs_core::{FileType, Filesystem};
use std::env;
use std::fmt;
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process::exit;
use std::sync::Arc;

/// Writes an error to stderr, then exits with status 1, mirroring the teacher's
/// `utils::error(bin, msg) -> !` used by every applet's startup failure path.
fn startup_error<M: fmt::Display>(bin: &str, msg: M) -> ! {
    eprintln!("{bin}: error: {msg}");
    exit(1);
}

/// A number of bytes, printed with a binary-prefix unit, as `utils::util::ByteSize` does.
struct ByteSize(u64);

impl fmt::Display for ByteSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        const UNITS: &[&str] = &["bytes", "KiB", "MiB", "GiB", "TiB", "PiB"];
        let mut order = 0;
        let mut n = self.0;
        while n >= 1024 && order < UNITS.len() - 1 {
            n /= 1024;
            order += 1;
        }
        write!(f, "{} {}", n, UNITS[order])
    }
}

fn print_usage(bin: &str) {
    eprintln!("Usage:");
    eprintln!(" {bin} format <path> [total_blocks]");
    eprintln!(" {bin} mount <path>");
}

fn main() {
    let mut args = env::args();
    let bin = args.next().unwrap_or_else(|| "edufs".to_owned());
    let cmd = match args.next() {
        Some(c) => c,
        None => {
            print_usage(&bin);
            exit(1);
        }
    };
    match cmd.as_str() {
        "format" => {
            let path = args.next().unwrap_or_else(|| startup_error(&bin, "missing path"));
            let mut opts = FormatOptions::default();
            if let Some(n) = args.next() {
                opts.total_blocks = n
                    .parse()
                    .unwrap_or_else(|_| startup_error(&bin, "total_blocks must be a number"));
            }
            if let Err(e) = Filesystem::format(Path::new(&path), opts) {
                startup_error(&bin, e);
            }
        }
        "mount" => {
            let path = args.next().unwrap_or_else(|| startup_error(&bin, "missing path"));
            let fs = Filesystem::mount(Path::new(&path), MountOptions::default())
                .unwrap_or_else(|e| startup_error(&bin, e));
            repl(&fs);
        }
        _ => {
            print_usage(&bin);
            exit(1);
        }
    }
}

/// Splits a command line into tokens, treating `"..."` as a single literal token.
fn tokenize(line: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut chars = line.chars().peekable();
    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }
        if c == '"' {
            chars.next();
            let mut tok = String::new();
            for c in chars.by_ref() {
                if c == '"' {
                    break;
                }
                tok.push(c);
            }
            tokens.push(tok);
            continue;
        }
        let mut tok = String::new();
        while let Some(&c) = chars.peek() {
            if c.is_whitespace() {
                break;
            }
            tok.push(c);
            chars.next();
        }
        tokens.push(tok);
    }
    tokens
}

fn print_help() {
    println!("commands:");
    println!("  cd <path>              change the current directory");
    println!("  pwd                    print the current directory");
    println!("  ls [path]              list a directory's entries");
    println!("  stat <path>            show an entry's metadata");
    println!("  touch <path>           create an empty file");
    println!("  cat <path>             print a file's content");
    println!("  echo <text...> > <path>  write text to a file");
    println!("  rm <path>              remove a file");
    println!("  mkdir <path>           create a directory");
    println!("  rmdir <path>           remove an empty directory");
    println!("  edit <path>            read lines from stdin until `.exit`, then write them");
    println!("  df                     show space and inode usage");
    println!("  cache                  show cache occupancy");
    println!("  help                   show this message");
    println!("  exit                   unmount and quit");
}

fn run_command(fs: &Arc<Filesystem>, tokens: &[String]) -> Result<(), Error> {
    match tokens.first().map(String::as_str) {
        Some("cd") => fs.cd(tokens.get(1).map(String::as_str).unwrap_or("/")),
        Some("pwd") => {
            println!("{}", fs.pwd());
            Ok(())
        }
        Some("ls") => {
            let entries = fs.ls(tokens.get(1).map(String::as_str))?;
            for e in entries {
                let marker = if matches!(e.kind, FileType::Directory) { "/" } else { "" };
                println!("{}{marker}", e.name);
            }
            Ok(())
        }
        Some("stat") => {
            let path = tokens.get(1).ok_or(Error::InvalidName)?;
            let s = fs.stat(path)?;
            let kind = if matches!(s.kind, FileType::Directory) { "DIRECTORY" } else { "FILE" };
            println!("id={} type={kind} size={} block_count={}", s.id, s.size, s.block_count);
            println!("parent_id={} name={}", s.parent_id, s.name);
            Ok(())
        }
        Some("touch") => fs.touch(tokens.get(1).ok_or(Error::InvalidName)?),
        Some("cat") => {
            let path = tokens.get(1).ok_or(Error::InvalidName)?;
            let content = fs.cat(path)?;
            io::stdout().write_all(&content).ok();
            if !content.ends_with(b"\n") {
                println!();
            }
            Ok(())
        }
        Some("echo") => {
            let gt = tokens.iter().position(|t| t == ">");
            let gt = match gt {
                Some(i) => i,
                None => return Err(Error::InvalidName),
            };
            let path = tokens.get(gt + 1).ok_or(Error::InvalidName)?;
            let content = tokens[1..gt].join(" ");
            fs.echo(path, content.as_bytes())
        }
        Some("rm") => fs.rm(tokens.get(1).ok_or(Error::InvalidName)?),
        Some("mkdir") => fs.mkdir(tokens.get(1).ok_or(Error::InvalidName)?),
        Some("rmdir") => fs.rmdir(tokens.get(1).ok_or(Error::InvalidName)?),
        Some("edit") => {
            let path = tokens.get(1).ok_or(Error::InvalidName)?;
            let mut content = String::new();
            for line in io::stdin().lock().lines() {
                let line = line.unwrap_or_default();
                if line == ".exit" {
                    break;
                }
                content.push_str(&line);
                content.push('\n');
            }
            fs.echo(path, content.as_bytes())
        }
        Some("df") => {
            let report = fs.df();
            println!(
                "blocks: {}/{} used ({} free), block size {}",
                report.used_blocks,
                report.total_blocks,
                ByteSize(report.free_blocks * report.block_size as u64),
                report.block_size
            );
            println!(
                "inodes: {}/{} used ({} free)",
                report.used_inodes, report.total_inodes, report.free_inodes
            );
            Ok(())
        }
        Some("cache") => {
            let (resident, dirty, capacity) = fs.cache_stats();
            println!("cache: {resident}/{capacity} frames resident, {dirty} dirty");
            Ok(())
        }
        Some("help") => {
            print_help();
            Ok(())
        }
        Some(other) => {
            eprintln!("edufs: unknown command `{other}`, try `help`");
            Ok(())
        }
        None => Ok(()),
    }
}

/// Reads one command per line from stdin until `exit`, dispatching each to the
/// mounted filesystem and printing the short message + numeric code scheme of
/// spec §6 on error.
fn repl(fs: &Arc<Filesystem>) {
    let stdin = io::stdin();
    loop {
        print!("edufs:{}> ", fs.pwd());
        let _ = io::stdout().flush();
        let mut line = String::new();
        if stdin.lock().read_line(&mut line).unwrap_or(0) == 0 {
            break;
        }
        let tokens = tokenize(line.trim_end());
        if tokens.first().map(String::as_str) == Some("exit") {
            break;
        }
        if let Err(e) = run_command(fs, &tokens) {
            eprintln!("edufs: {e} ({})", e.code());
        }
    }
    if let Err(e) = fs.unmount() {
        eprintln!("edufs: error unmounting: {e} ({})", e.code());
        exit(1);
    }
    exit(0);
}
