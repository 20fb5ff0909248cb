use std::cmp::max;
use std::sync::Arc;
use std::time::Instant;

use clap::{Parser, ValueEnum};
use ndarray::{ArrayD, IxDyn};
use tracing_subscriber::EnvFilter;

use npu_graph::hardware::SocGeneration;
use npu_graph::operation::Operation;
use npu_graph::ops::{
    ElewiseOperation, FusedQkvOperation, LinearOperation, MlpActivation, MlpOperation, Precision, ResidualMlpOperation,
    SoftmaxOperation,
};
use npu_graph::shape::{Shape, TensorDesc};
use npu_runtime::{Runtime, RuntimeConfig};

#[derive(Debug, clap::Parser)]
struct Args {
    #[clap(short, long, value_enum, default_value_t = Generation::Gen2)]
    generation: Generation,
    #[clap(short, long, value_enum, default_value_t = PrecisionArg::Fp16)]
    precision: PrecisionArg,

    #[clap(short, long, default_value_t = 1)]
    batch: usize,
    #[clap(short, long, default_value_t = 128)]
    seq: usize,
    #[clap(long, default_value_t = 512)]
    hidden: usize,
    #[clap(long, default_value_t = 1024)]
    ffn: usize,

    #[clap(long)]
    shared_pool: Option<usize>,
    #[clap(short, long)]
    print: bool,
    #[clap(long, short)]
    n: Option<usize>,

    #[clap(value_enum)]
    op: OpArg,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum Generation {
    Gen1,
    Gen2,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum PrecisionArg {
    Fp16,
    Bf16,
    Fp32,
}

#[derive(Debug, Copy, Clone, ValueEnum)]
enum OpArg {
    Add,
    Linear,
    LinearBias,
    Qkv,
    MlpSwiglu,
    MlpGelu,
    ResidualMlp,
    Softmax,
}

const DEFAULT_ITERATIONS: usize = 20;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let n = args.n.unwrap_or(DEFAULT_ITERATIONS);

    if cfg!(debug_assertions) {
        eprintln!("Warning: debug assertions are enabled, allocation checking slows down every execution");
    }

    let generation = match args.generation {
        Generation::Gen1 => SocGeneration::Gen1,
        Generation::Gen2 => SocGeneration::Gen2,
    };
    let precision = match args.precision {
        PrecisionArg::Fp16 => Precision::Fp16,
        PrecisionArg::Bf16 => Precision::Bf16,
        PrecisionArg::Fp32 => Precision::Fp32,
    };

    let mut config = RuntimeConfig::for_generation(generation);
    config.shared_pool_bytes = args.shared_pool;
    let runtime = match Runtime::new(config) {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("Error: failed to create runtime: {}", e);
            std::process::exit(1);
        }
    };

    let (op, inputs) = build_op(&args, precision);
    println!("Preparing {} on {:?} with inputs {:?}", op.name(), generation, inputs);

    let mut prepared = match runtime.prepare(op, &inputs) {
        Ok(prepared) => prepared,
        Err(e) => {
            eprintln!("Error: {}", e);
            eprintln!("    class: {:?}, retryable: {}", e.class(), e.is_retryable());
            std::process::exit(1);
        }
    };

    if args.print {
        println!("{:?}", prepared.executor());
    }
    println!("Kernels: {:?}", prepared.kernels());
    println!("Memory: {:?}", prepared.mem_usage());

    let arrays = inputs
        .iter()
        .map(|desc| ArrayD::zeros(IxDyn(desc.shape.dims())))
        .collect::<Vec<_>>();

    println!("Warmup");
    for _ in 0..max(1, n / 10) {
        if let Err(e) = prepared.eval(&arrays) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }

    println!("Throughput test");
    let start = Instant::now();
    for _ in 0..n {
        if let Err(e) = prepared.eval(&arrays) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
    let delta = start.elapsed().as_secs_f32();

    println!("Profiling");
    prepared.set_profile(true);
    if prepared.eval(&arrays).is_ok() {
        if let Some(profile) = prepared.last_profile() {
            println!("{}", profile);
        }
    }

    if let Some(stats) = runtime.cache_stats() {
        println!("Tiling cache: {:?}", stats);
    }
    println!("Throughput: {} evals/s", n as f32 / delta);
}

fn build_op(args: &Args, precision: Precision) -> (Arc<dyn Operation>, Vec<TensorDesc>) {
    let dtype = precision.dtype();
    let desc = |dims: &[usize]| TensorDesc::new(dtype, Shape::fixed(dims));
    let (b, s, h, f) = (args.batch, args.seq, args.hidden, args.ffn);

    let mlp = |activation: MlpActivation| {
        let up = match activation {
            MlpActivation::Swiglu => 2 * f,
            MlpActivation::Gelu => f,
        };
        (MlpOperation::new(activation, precision), vec![desc(&[b, s, h]), desc(&[h, up]), desc(&[f, h])])
    };

    match args.op {
        OpArg::Add => (Arc::new(ElewiseOperation::add()), vec![desc(&[b, s, h]), desc(&[b, s, h])]),
        OpArg::Linear => (
            Arc::new(LinearOperation::new(precision, false)),
            vec![desc(&[b * s, h]), desc(&[h, f])],
        ),
        OpArg::LinearBias => (
            Arc::new(LinearOperation::new(precision, true)),
            vec![desc(&[b * s, h]), desc(&[h, f]), desc(&[f])],
        ),
        OpArg::Qkv => (
            Arc::new(FusedQkvOperation::new(precision)),
            vec![desc(&[b, s, h]), desc(&[h, 3 * h])],
        ),
        OpArg::MlpSwiglu => {
            let (op, inputs) = mlp(MlpActivation::Swiglu);
            (Arc::new(op), inputs)
        }
        OpArg::MlpGelu => {
            let (op, inputs) = mlp(MlpActivation::Gelu);
            (Arc::new(op), inputs)
        }
        OpArg::ResidualMlp => {
            let (op, mut inputs) = mlp(MlpActivation::Swiglu);
            inputs.insert(1, desc(&[h]));
            (Arc::new(ResidualMlpOperation::new(1e-6, op)), inputs)
        }
        OpArg::Softmax => (Arc::new(SoftmaxOperation { masked: false }), vec![desc(&[b, s, s])]),
    }
}

