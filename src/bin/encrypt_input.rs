//! Client-side input encryption: normalises the test-pixel batch and packs
//! each image into one ciphertext in the upload directory.

use colored::Colorize;

use slotnet::backend::{CkksBackend, ReferenceBackend};
use slotnet::params::{InstanceSize, Network};
use slotnet::storage::{read_bytes, write_ciphertext, InstanceDirs};
use slotnet::{dataset, EvalError, Result};

fn main() {
    if let Err(e) = run() {
        eprintln!("{} {}", "error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let (network, size) = parse_args();
    let dirs = InstanceDirs::new(std::env::current_dir()?, size);

    let mut backend = ReferenceBackend::deserialize_context(&read_bytes(&dirs.context_file())?)?;
    let pk = ReferenceBackend::deserialize_public_key(&read_bytes(&dirs.public_key_file())?)?;
    backend.attach_public_key(&pk);

    let images = dataset::load_images(&dirs.test_pixels_file(), network)?;
    if images.is_empty() {
        return Err(EvalError::Io(format!(
            "no data found in {}",
            dirs.test_pixels_file().display()
        )));
    }
    if images.len() != dirs.batch_size() {
        return Err(EvalError::InvalidParams(format!(
            "dataset size {} does not match instance size {} (batch {})",
            images.len(),
            size.name(),
            dirs.batch_size()
        )));
    }

    println!(
        "{} {} images for {}",
        "[client] encrypting".cyan(),
        images.len(),
        network.name().bold()
    );
    let level = backend.geometry().max_level;
    for (i, raw) in images.iter().enumerate() {
        let packed = dataset::normalize(network, raw);
        let pt = backend.encode(&packed, level)?;
        let ct = backend.encrypt(&pt)?;
        write_ciphertext(&dirs.input_ciphertext_file(i), &ct)?;
    }
    println!("{}", "[client] ciphertexts uploaded".green());
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
