use argh::FromArgs;
use std::path::PathBuf;

use kornia_caption::{
    blip::{Blip, BlipConfig},
    device::select_device,
    server::CaptionServer,
};

#[derive(FromArgs)]
/// Serve image captions over line-delimited JSON on stdin/stdout
struct Args {
    /// run the model on the cpu even if an accelerator is available
    #[argh(switch)]
    cpu: bool,

    /// the maximum length of the generated caption, in tokens
    #[argh(option, default = "50")]
    sample_len: usize,

    /// path to local model safetensors weights instead of downloading them
    #[argh(option)]
    weights_path: Option<PathBuf>,

    /// path to a local tokenizer.json instead of downloading it
    #[argh(option)]
    tokenizer_path: Option<PathBuf>,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // logs go to stderr, stdout carries the protocol
    env_logger::init();

    let args: Args = argh::from_env();

    let config = BlipConfig {
        sample_len: args.sample_len,
        weights_path: args.weights_path,
        tokenizer_path: args.tokenizer_path,
        ..Default::default()
    };

    let device = select_device(args.cpu);

    let mut server = CaptionServer::new(std::io::stdout().lock());
    server.startup(&device, |device| Blip::new(config, device))?;

    log::info!("waiting for requests");
    server.serve(std::io::stdin().lock())?;

    Ok(())
}
