//! Client-side decryption: decrypts every result ciphertext, takes the
//! argmax over the logit slots and writes the predictions file.

use colored::Colorize;

use slotnet::backend::ReferenceBackend;
use slotnet::params::{InstanceSize, Network};
use slotnet::storage::{read_bytes, read_ciphertext, write_predictions, InstanceDirs};
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

    let mut backend = ReferenceBackend::deserialize_context(&read_bytes(&dirs.context_file())?)?;
    let sk = ReferenceBackend::deserialize_secret_key(&read_bytes(&dirs.secret_key_file())?)?;
    backend.attach_secret_key(&sk);
    let ctx = EvalContext::new(backend);

    let mut labels = Vec::with_capacity(dirs.batch_size());
    for i in 0..dirs.batch_size() {
        let ct = read_ciphertext(&dirs.result_ciphertext_file(i))?;
        let label = ctx.read_label(&ct, network.num_classes())?;
        println!("         [client] ciphertext {} -> class {}", i, label);
        labels.push(label);
    }

    write_predictions(&dirs.predictions_file(), &labels)?;
    println!(
        "{} {}",
        "[client] predictions written to".green(),
        dirs.predictions_file().display()
    );
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
