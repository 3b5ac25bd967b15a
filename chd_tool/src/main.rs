#![doc = include_str!("../README.md")]

mod inout;

use std::fmt::Display;
use std::hash::Hash;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use chd::stats::BuildStatsSummary;
use chd::utils::is_prime;
use chd::{uniq, BuildConf, Function, GetSize, PhfKey};
use clap::{Parser, ValueEnum};
use cpu_time::ProcessTime;

use inout::{parse_int, parse_seed, slab_keys, slurp};

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
pub enum KeyType {
    /// Parse keys as 32-bit unsigned integers
    Uint32,
    /// Parse keys as 64-bit unsigned integers
    Uint64,
    /// Hash each input line as an opaque byte string
    String,
}

/// Builds a CHD perfect hash function over the given keys and prints the index assigned to each of them.
#[derive(Parser)]
#[command(version, about)]
pub struct Conf {
    /// Read keys from the given file, - for the standard input
    #[arg(short = 'f', value_name = "PATH")]
    pub file: Option<PathBuf>,

    /// Number of keys per displacement bucket (reported as g_load)
    #[arg(short = 'l', default_value_t = 4, value_name = "NUM")]
    pub lambda: usize,

    /// Load factor of the output table, in percent
    #[arg(short = 'a', default_value_t = 80, value_name = "PCT")]
    pub alpha: usize,

    /// Seed of the hash function family, drawn from the system generator by default
    #[arg(short = 's', value_name = "SEED", value_parser = parse_seed)]
    pub seed: Option<u32>,

    /// Parse and hash keys as uint32, uint64 or string
    #[arg(short = 't', value_enum, default_value_t = KeyType::Uint32, value_name = "TYPE")]
    pub key_type: KeyType,

    /// Round the bucket count and the output range up to powers of two to avoid modular division
    #[arg(short = '2')]
    pub nodiv: bool,

    /// Do not print key-hash pairs
    #[arg(short = 'n')]
    pub noprint: bool,

    /// Report construction and evaluation statistics
    #[arg(short = 'v')]
    pub verbose: bool,

    /// Print the primes among the integer keys and exit without hashing
    #[arg(short = 'p')]
    pub primes: bool,

    /// Additional keys, appended to those read from the file
    #[arg(value_name = "KEY")]
    pub keys: Vec<String>,
}

/// Reads the integer keys of the file given by `conf` and appends the positional ones.
fn int_keys(conf: &Conf) -> anyhow::Result<Vec<u64>> {
    let mut keys = Vec::new();
    if let Some(path) = &conf.file {
        let data = slurp(path).with_context(|| path.display().to_string())?;
        for line in slab_keys(&data) {
            let key = std::str::from_utf8(line)
                .ok()
                .and_then(parse_int)
                .with_context(|| {
                    format!("invalid integer key: {}", String::from_utf8_lossy(line))
                })?;
            keys.push(key);
        }
    }
    for arg in &conf.keys {
        keys.push(parse_int(arg).with_context(|| format!("invalid integer key: {}", arg))?);
    }
    Ok(keys)
}

/// Builds the function for the deduplicated `keys`, compacts its displacement table,
/// and reports the statistics requested by `-v` to the standard error.
fn build_and_report<K: PhfKey + PartialEq>(conf: &Conf, keys: &[K], seed: u32) -> Function {
    if conf.verbose {
        eprintln!("loaded {} keys", keys.len());
    }
    let build_conf = BuildConf {
        lambda: conf.lambda,
        alpha: conf.alpha,
        seed,
        nodiv: conf.nodiv,
        d_limit: None,
    };
    let mut stats = BuildStatsSummary::default();
    let start = ProcessTime::now();
    let mut h = Function::try_from_slice_with_conf_stats(keys, build_conf, &mut stats)
        .expect("the unbounded displacement search cannot be exhausted");
    let build_seconds = start.elapsed().as_secs_f64();
    h.compact();
    if conf.verbose {
        eprintln!(
            "found perfect hash for {} keys in {:.6}s ({} buckets placed in {} trials)",
            keys.len(),
            build_seconds,
            stats.buckets_placed,
            stats.trials
        );
        let n1 = keys.len().max(1);
        eprintln!(
            "r:{} m:{} d_max:{} d_bits:{} k_bits:{:.2} g_load:{:.2} size:{:.2} bits/key",
            h.buckets(),
            h.range(),
            h.d_max(),
            h.d_bits(),
            h.buckets() as f64 * h.d_bits() as f64 / n1 as f64,
            keys.len() as f64 / h.buckets() as f64,
            8.0 * h.size_bytes() as f64 / n1 as f64
        );
        let start = ProcessTime::now();
        let mut sum = 0u64;
        for key in keys {
            sum = sum.wrapping_add(h.get(key) as u64);
        }
        eprintln!(
            "hashed {} keys in {:.6}s (x:{})",
            keys.len(),
            start.elapsed().as_secs_f64(),
            sum
        );
    }
    h
}

/// Deduplicates, hashes and prints integer keys.
fn exec<K>(conf: &Conf, mut keys: Vec<K>, seed: u32)
where
    K: PhfKey + PartialEq + Eq + Hash + Display,
{
    let len = uniq(&mut keys);
    keys.truncate(len);
    let h = build_and_report(conf, &keys, seed);
    if !conf.noprint {
        for key in &keys {
            println!("{} : {}", key, h.get(key));
        }
    }
}

fn run(conf: &Conf) -> anyhow::Result<()> {
    if conf.primes {
        for key in int_keys(conf)? {
            if is_prime(key) {
                println!("{}", key);
            }
        }
        return Ok(());
    }
    let seed = conf.seed.unwrap_or_else(rand::random);
    match conf.key_type {
        KeyType::Uint32 => exec(
            conf,
            int_keys(conf)?.into_iter().map(|key| key as u32).collect::<Vec<u32>>(),
            seed,
        ),
        KeyType::Uint64 => exec(conf, int_keys(conf)?, seed),
        KeyType::String => {
            let slab = match &conf.file {
                Some(path) => slurp(path).with_context(|| path.display().to_string())?,
                None => Vec::new(),
            };
            let mut keys: Vec<&[u8]> = slab_keys(&slab);
            keys.extend(conf.keys.iter().map(|arg| arg.as_bytes()));
            let len = uniq(&mut keys);
            keys.truncate(len);
            let h = build_and_report(conf, &keys, seed);
            if !conf.noprint {
                for key in &keys {
                    println!("{:<32} : {}", String::from_utf8_lossy(key), h.get(key));
                }
            }
        }
    }
    Ok(())
}

fn main() -> ExitCode {
    let conf = match Conf::try_parse() {
        Ok(conf) => conf,
        Err(err) => {
            let _ = err.print();
            return if err.use_stderr() { ExitCode::FAILURE } else { ExitCode::SUCCESS };
        }
    };
    if let Err(err) = run(&conf) {
        eprintln!("{:#}", err);
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
