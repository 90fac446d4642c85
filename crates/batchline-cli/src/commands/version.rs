//! Version command implementation.

const VERSION: &str = env!("CARGO_PKG_VERSION");

pub fn run() {
    println!("batchline {VERSION}");
    println!();
    println!("Micro-batching queue consumer with at-least-once delivery.");
    println!();
    println!("Build info:");
    println!("  Target:       {}", std::env::consts::ARCH);
    println!("  OS:           {}", std::env::consts::OS);
    println!(
        "  AMQP support: {}",
        if cfg!(feature = "amqp") { "yes" } else { "no" }
    );
}
