//! Server-side encrypted inference: runs the network plan over every
//! uploaded ciphertext and writes the encrypted logits to the download
//! directory. Images are independent; each gets its own cloned backend so
//! the per-driver key-table swaps cannot interleave (the key material itself
//! is shared, read-only).

use std::time::Instant;

use colored::Colorize;
use rayon::prelude::*;

use slotnet::backend::ReferenceBackend;
use slotnet::network::{evaluate, plan_for, ModelWeights};
use slotnet::params::{InstanceSize, Network};
use slotnet::storage::{read_bytes, read_ciphertext, write_ciphertext, InstanceDirs};
use slotnet::{EvalContext, Result};

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let (network, size) = parse_args();
    let dirs = InstanceDirs::new(std::env::current_dir()?, size);

    println!("{}", "[server] loading keys".cyan());
    let backend = ReferenceBackend::deserialize_context(&read_bytes(&dirs.context_file())?)?;
    backend.deserialize_mult_keys(&read_bytes(&dirs.mult_keys_file())?)?;

    let plan = plan_for(network);
    let mut groups = Vec::with_capacity(plan.num_groups);
    for g in 0..plan.num_groups {
        groups.push(ReferenceBackend::deserialize_rotation_keys(&read_bytes(
            &dirs.layer_rotation_keys_file(g),
        )?)?);
    }

    let weights = ModelWeights::from_dir(&plan, &dirs.weights_dir(network))?;

    println!(
        "{} {} over {} ciphertexts",
        "[server] running encrypted".cyan(),
        network.name().bold(),
        dirs.batch_size()
    );

    let jobs: Vec<(usize, ReferenceBackend)> =
        (0..dirs.batch_size()).map(|i| (i, backend.clone())).collect();
    let timings: Vec<Result<std::time::Duration>> = jobs
        .into_par_iter()
        .map(|(i, be)| {
            let ctx = EvalContext::new(be);
            let input = read_ciphertext(&dirs.input_ciphertext_file(i))?;
            let start = Instant::now();
            let result = evaluate(&ctx, &plan, &weights, &groups, &input)?;
            write_ciphertext(&dirs.result_ciphertext_file(i), &result)?;
            Ok(start.elapsed())
        })
        .collect();

    for (i, timing) in timings.into_iter().enumerate() {
        let elapsed = timing?;
        println!(
            "         [server] ciphertext {} evaluated in {:.2}s",
            i,
            elapsed.as_secs_f64()
        );
    }
    println!("{}", "[server] results written".green());
    Ok(())
}

fn parse_args() -> (Network, InstanceSize) {
    let argv: Vec<String> = std::env::args().collect();
    if argv.len() < 3 {
        usage(&argv[0]);
    }
    let network = match Network::from_arg(&argv[1]) {
        Ok(n) => n,
        Err(_) => usage(&argv[0]),
    };
    let size = match argv[2].parse::<usize>().ok().and_then(|v| InstanceSize::from_arg(v).ok()) {
        Some(s) => s,
        None => usage(&argv[0]),
    };
    (network, size)
}

fn usage(prog: &str) -> ! {
    eprintln!("Usage: {} <mlp|lenet5|resnet20> <instance-size>", prog);
    eprintln!("  Instance-size: 0-SINGLE, 1-SMALL, 2-MEDIUM, 3-LARGE");
    std::process::exit(2);
}
