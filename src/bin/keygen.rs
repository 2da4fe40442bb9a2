//! Client-side key generation: builds the context for the chosen network,
//! derives the per-layer rotation-key groups from the plan, and serializes
//! everything into the instance's io directory.

use colored::Colorize;

use slotnet::backend::ReferenceBackend;
use slotnet::network::plan_for;
use slotnet::params::{InstanceSize, Network};
use slotnet::rotation_plan;
use slotnet::storage::{write_bytes, InstanceDirs};
use slotnet::Result;

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let (network, size) = parse_args();
    let params = network.ckks_params();
    let dirs = InstanceDirs::new(std::env::current_dir()?, size);

    println!(
        "{} {} / {} ({} slots, depth {}, {} after bootstrap)",
        "[client] generating keys for".cyan(),
        network.name().bold(),
        size.name(),
        params.num_slots,
        params.depth,
        params.bootstrap_level
    );

    let mut backend = ReferenceBackend::new(&params);
    let (pk, sk) = backend.generate_keys(rand::random());

    let plan = plan_for(network);
    let groups = plan.rotation_groups();

    write_bytes(&dirs.context_file(), &backend.serialize_context())?;
    write_bytes(&dirs.public_key_file(), &ReferenceBackend::serialize_public_key(&pk))?;
    write_bytes(&dirs.mult_keys_file(), &ReferenceBackend::serialize_mult_keys(&pk))?;

    let union = rotation_plan::group_union(groups.iter());
    write_bytes(&dirs.rotation_keys_file(), &ReferenceBackend::serialize_rotation_keys(&union))?;
    for (g, offsets) in groups.iter().enumerate() {
        println!("         layer group {}: {} rotation keys", g + 1, offsets.len());
        write_bytes(
            &dirs.layer_rotation_keys_file(g),
            &ReferenceBackend::serialize_rotation_keys(offsets),
        )?;
    }

    write_bytes(&dirs.secret_key_file(), &ReferenceBackend::serialize_secret_key(&sk))?;
    println!("{}", "[client] keys serialized".green());
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
