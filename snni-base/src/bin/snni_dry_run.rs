//! Code of a binary running a small convolutional network through the layer dispatcher on the plaintext engine

use snni_base::config::RunConfig;
use snni_base::conv::Conv2DParams;
use snni_base::errors::Result;
use snni_base::lifecycle::ComputationLifecycle;
use snni_base::marshal::{flatten, unflatten};
use snni_base::party::PartyRole;
use snni_base::protocol::clear_engine::ClearEngine;
use snni_base::tensor::{
    release, share_from_signed, Share, ShareMatrix, ShareTensor4, ShareVector,
};
use snni_base::window::{Padding2D, Window2D};
use snni_utils::eprintln_or_log;
use snni_utils::execute_main::execute_main;
use std::fs::File;

use clap::Parser;

#[derive(Parser, Debug)]
#[clap(author, version, about, long_about=None)]
struct Args {
    #[clap(value_parser)]
    /// Party role of this process: A, B or C
    party: String,
    #[clap(long, value_parser)]
    /// (optional) Path to a JSON run configuration
    config: Option<String>,
    #[clap(long, value_parser)]
    /// (optional) Path of a CSV file receiving the run summary
    csv_output: Option<String>,
}

const IMAGE_SIZE: usize = 8;
const CHANNELS: usize = 2;
const CLASSES: usize = 3;

fn fixed_point(x: i64, denominator: u64) -> Share {
    share_from_signed(x * denominator as i64)
}

/// Party A holds every secret in full and the other parties hold zero shares.
fn share_of(party: PartyRole, value: Share) -> Share {
    match party {
        PartyRole::A => value,
        _ => 0,
    }
}

/// This binary runs conv -> relu -> max pool -> average pool -> dense -> argmax on the plaintext engine.
///
/// # Arguments
///
/// * `party` - party role of this process
/// * `config` - path to a JSON run configuration; the party argument overrides its role
/// * `csv_output` - path where the summary table is written
///
/// # Usage
///
/// < this_binary > [--config <CONFIG>] [--csv-output <CSV_OUTPUT>] <PARTY>
fn main() {
    // Initialize a logger that collects the per-layer and summary reports.
    // This information can be accessed via RUST_LOG.
    env_logger::init();
    execute_main(|| -> Result<()> {
        let args = Args::parse();
        let mut config = match &args.config {
            Some(path) => RunConfig::from_file(path)?,
            None => RunConfig::default(),
        };
        config.party = args.party.parse::<PartyRole>()?;
        let party = config.party;
        let sf = config.fixed_precision.fractional_bits;
        let denominator = config.fixed_precision.denominator();

        let mut dispatcher =
            ComputationLifecycle::new(ClearEngine::new(), config).start_computation()?;

        let image = ShareTensor4::from_shape_fn((1, IMAGE_SIZE, IMAGE_SIZE, 1), |(_, h, w, _)| {
            share_of(party, fixed_point(((h * IMAGE_SIZE + w) % 7) as i64 - 3, denominator))
        });
        let conv = Conv2DParams {
            n: 1,
            h: IMAGE_SIZE,
            w: IMAGE_SIZE,
            ci: 1,
            fh: 5,
            fw: 5,
            co: CHANNELS,
            padding: Padding2D::default(),
            stride_h: 1,
            stride_w: 1,
        };
        let filter = ShareTensor4::from_shape_fn(conv.filter_shape(1), |(fh, fw, _, co)| {
            share_of(party, fixed_point((fh + fw + co) as i64 % 3 - 1, denominator))
        });
        let mut activations = ShareTensor4::zeros(conv.output_shape());
        dispatcher.conv_2d(&conv, &image, &filter, &mut activations)?;

        let flat: ShareVector = ShareVector::from(flatten(&activations));
        let mut rectified = ShareVector::zeros(flat.len());
        dispatcher.relu(flat.len(), &flat, &mut rectified, sf, true)?;
        let rectified: ShareTensor4 = unflatten(rectified.into_raw_vec(), conv.output_shape())?;
        release(&mut activations);

        let max_window = Window2D::new(2, 2, 2, 2);
        let mut pooled = ShareTensor4::zeros(max_window.output_shape(rectified.shape()));
        dispatcher.max_pool(&max_window, &rectified, &mut pooled)?;

        let avg_window = Window2D::new(2, 2, 1, 1).with_padding(Padding2D::new(0, 1, 0, 1));
        let mut averaged = ShareTensor4::zeros(avg_window.output_shape(pooled.shape()));
        dispatcher.avg_pool(&avg_window, &pooled, &mut averaged)?;
        release(&mut pooled);

        let features = averaged.len();
        let flat_features: ShareMatrix = unflatten(flatten(&averaged), (1, features))?;
        release(&mut averaged);
        let weights = ShareMatrix::from_shape_fn((features, CLASSES), |(i, j)| {
            share_of(party, fixed_point((i * CLASSES + j) as i64 % 5 - 2, denominator))
        });
        let mut logits = ShareMatrix::zeros((1, CLASSES));
        dispatcher.mat_mul_2d(1, features, CLASSES, &flat_features, &weights, &mut logits)?;
        dispatcher.scale_down(&mut logits, sf)?;

        let mut prediction = ShareVector::zeros(1);
        dispatcher.arg_max(1, CLASSES, &logits, &mut prediction)?;
        eprintln_or_log!("Party {} predicted class share: {}", party, prediction[0]);

        let (summary, _) = dispatcher.end_computation()?;
        if let Some(path) = &args.csv_output {
            summary.write_csv(File::create(path)?)?;
            eprintln_or_log!("Summary written to {}", path);
        }
        Ok(())
    });
}
