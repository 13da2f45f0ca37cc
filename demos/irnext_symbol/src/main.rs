use anyhow::Context;
use burn::config::Config;
use clap::Parser;
use irnext::graph::Symbol;
use irnext::graph::ops::Precision;
use irnext::models::irnext::{
    BottleneckMode, DeepLabConfig, DilationPattern, IrNextConfig, PREFAB_IRNEXT_MAP,
    SegStrideMode, TaskMode,
};
use tracing_subscriber::EnvFilter;

// $ --preset=irnext101_deeplab_shuttle_seg --deeplab --input-size=512
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// List the well-known presets and exit.
    #[arg(long, default_value_t = false)]
    list_presets: bool,

    /// Start from a named preset.
    #[arg(long)]
    preset: Option<String>,

    /// Start from a saved JSON config; takes precedence over `--preset`.
    #[arg(long)]
    config: Option<String>,

    /// Save the resolved config to this path.
    #[arg(long)]
    save_config: Option<String>,

    /// Number of classes.
    #[arg(long)]
    num_classes: Option<usize>,

    /// Network depth.
    #[arg(long)]
    num_layers: Option<usize>,

    /// Width of the final stage.
    #[arg(long)]
    outfeature: Option<usize>,

    /// Unit style: 0-3, or plain, resnext, inception_resnet, dual_path.
    #[arg(long)]
    bottleneck: Option<BottleneckMode>,

    /// Inner width divisor.
    #[arg(long)]
    expansion: Option<f64>,

    /// Groups of the 3x3 convolutions; 4, 8, 16, 32 or 64 in practice.
    #[arg(long)]
    num_group: Option<usize>,

    /// Final feature map size; the nominal input is ``32 * lastout``.
    #[arg(long)]
    lastout: Option<usize>,

    /// Dilation pattern, e.g. ``DEEPLAB.SHUTTLE``.
    #[arg(long)]
    dilpat: Option<DilationPattern>,

    /// Inception-ResNet pre-activation sum.
    #[arg(long)]
    pre_activation: Option<bool>,

    /// Deformable offset groups of the final stage.
    #[arg(long)]
    deform: Option<usize>,

    /// Convolution workspace hint.
    #[arg(long)]
    workspace: Option<usize>,

    /// Task: CLS or SEG.
    #[arg(long)]
    task: Option<TaskMode>,

    /// Segmentation output stride: 4x, 8x or 16x.
    #[arg(long)]
    seg_stride_mode: Option<SegStrideMode>,

    /// Precision: float32 or float16.
    #[arg(long)]
    dtype: Option<Precision>,

    /// Mark shortcuts for recomputation.
    #[arg(long)]
    memonger: Option<bool>,

    /// Wrap the backbone in the DeepLab segmentation head.
    #[arg(long, default_value_t = false)]
    deeplab: bool,

    /// Build the DeepLab inference symbol instead of the training symbol.
    #[arg(long, default_value_t = false)]
    test: bool,

    /// Input resolution for shape inference; defaults to ``32 * lastout``.
    #[arg(long)]
    input_size: Option<usize>,

    /// Print the graph document as JSON instead of a summary.
    #[arg(long, default_value_t = false)]
    json: bool,

    /// Log filter directives.
    #[arg(long, default_value = "info")]
    log: String,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&args.log)?)
        .init();

    if args.list_presets {
        println!("Available presets:");
        for prefab in PREFAB_IRNEXT_MAP.items {
            println!("* \"{}\": {}", prefab.name, prefab.description);
        }
        return Ok(());
    }

    let config = apply_overrides(&args, base_config(&args)?);
    tracing::debug!(%config, "resolved config");

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("failed to save config to {path}"))?;
    }

    let input_size = args.input_size.unwrap_or(32 * config.lastout);

    if args.deeplab {
        let deeplab = DeepLabConfig::new(config.num_classes, config);
        let symbol = deeplab.build_symbol(!args.test)?;
        if args.json {
            println!("{}", symbol.to_json()?);
            return Ok(());
        }
        print_summary(&symbol, input_size)?;
        println!("init plan:");
        for (name, init) in deeplab.init_plan()? {
            match init.fixed_values() {
                Some(values) => println!("  {name}: {init:?} ({} values)", values.len()),
                None => println!("  {name}: {init:?}"),
            }
        }
        return Ok(());
    }

    let symbol = config.build()?;
    if args.json {
        println!("{}", symbol.to_json()?);
    } else {
        print_summary(&symbol, input_size)?;
    }
    Ok(())
}

fn base_config(args: &Args) -> anyhow::Result<IrNextConfig> {
    if let Some(path) = &args.config {
        return IrNextConfig::load(path)
            .map_err(|err| anyhow::anyhow!("failed to load config from {path}: {err:?}"));
    }
    if let Some(name) = &args.preset {
        return Ok(PREFAB_IRNEXT_MAP.try_lookup_prefab(name)?.to_config());
    }
    Ok(IrNextConfig::new(
        args.num_classes.unwrap_or(1000),
        args.num_layers.unwrap_or(50),
        args.outfeature.unwrap_or(2048),
    ))
}

fn apply_overrides(
    args: &Args,
    mut config: IrNextConfig,
) -> IrNextConfig {
    if let Some(v) = args.num_classes {
        config.num_classes = v;
    }
    if let Some(v) = args.num_layers {
        config.num_layers = v;
    }
    if let Some(v) = args.outfeature {
        config.outfeature = v;
    }
    if let Some(v) = args.bottleneck {
        config.bottleneck = v;
    }
    if let Some(v) = args.expansion {
        config.expansion = v;
    }
    if let Some(v) = args.num_group {
        config.num_group = v;
    }
    if let Some(v) = args.lastout {
        config.lastout = v;
    }
    if let Some(v) = args.dilpat {
        config.dilation_pattern = v;
    }
    if let Some(v) = args.pre_activation {
        config.pre_activation = v;
    }
    if let Some(v) = args.deform {
        config.deform = v;
    }
    if let Some(v) = args.workspace {
        config.workspace = v;
    }
    if let Some(v) = args.task {
        config.task = v;
    }
    if let Some(v) = args.seg_stride_mode {
        config.seg_stride_mode = v;
    }
    if let Some(v) = args.dtype {
        config.precision = v;
    }
    if let Some(v) = args.memonger {
        config.memonger = v;
    }
    config
}

fn print_summary(
    symbol: &Symbol,
    input_size: usize,
) -> anyhow::Result<()> {
    let data = [1, 3, input_size, input_size];
    let output_shape = symbol.output_shape(data)?;

    println!("output: {} ({})", symbol.output_node().name, symbol.output_node().op.type_name());
    println!("declared nodes: {}", symbol.graph.len());
    println!("reachable nodes: {}", symbol.reachable_nodes().count());
    println!("inputs: {:?}", symbol.list_inputs());
    println!("parameters: {}", symbol.parameter_names().len());
    println!("auxiliary states: {}", symbol.list_auxiliary_states().len());
    println!("output shape for {data:?}: {output_shape:?}");
    println!("operators:");
    for (op, count) in symbol.op_histogram() {
        println!("  {op}: {count}");
    }
    Ok(())
}
