//! Command-line surface: global options via `#[derive(Parser)]`, with one subcommand
//! variant per operation this crate exposes.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::lod_filter::LodFilterMode;
use crate::refs::IdentityMode;

#[derive(Debug, Parser)]
#[command(name = "cgt", version, about = "Batch CityGML/CityJSON processor")]
pub struct Cli {
    /// Minimum severity written to the log.
    #[arg(long, global = true, default_value = "info")]
    pub log_level: LogLevel,
    /// Redirects logging to a file instead of stderr.
    #[arg(long, global = true)]
    pub log_file: Option<PathBuf>,
    /// Writes the process id to this file on startup.
    #[arg(long, global = true)]
    pub pid_file: Option<PathBuf>,
    /// Directory of additional namespace declarations to merge into the built-in table.
    #[arg(long, global = true)]
    pub extensions: Option<PathBuf>,
    /// Optional TOML file overriding worker-pool sizing, bucket counts, and the
    /// default CityJSON LoD-mapping policy.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
}

impl LogLevel {
    pub fn to_filter(self) -> log::LevelFilter {
        match self {
            LogLevel::Error => log::LevelFilter::Error,
            LogLevel::Warn => log::LevelFilter::Warn,
            LogLevel::Info => log::LevelFilter::Info,
            LogLevel::Debug => log::LevelFilter::Debug,
        }
    }
}

/// Options shared by every subcommand that reads and writes one CityGML document per
/// input file, flattened into every subcommand that needs it.
#[derive(Debug, Args, Clone)]
pub struct CommonIo {
    /// One or more input files or glob patterns.
    pub inputs: Vec<String>,
    #[arg(long)]
    pub input_encoding: Option<String>,
    #[arg(long, default_value = "UTF-8")]
    pub output_encoding: String,
    #[arg(long, value_parser = ["1.0", "2.0", "3.0"])]
    pub citygml_version: Option<String>,
    #[arg(long)]
    pub pretty_print: bool,
    /// Overwrite the input file atomically instead of writing a suffixed sibling.
    #[arg(long)]
    pub overwrite: bool,
    /// Output directory; defaults to each input's own directory.
    #[arg(long)]
    pub output: Option<PathBuf>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Read-only: reports per-file feature/LoD/appearance counts.
    Stats {
        #[command(flatten)]
        io: CommonIo,
    },
    /// Scales or offsets the Z coordinate of every point.
    ChangeHeight {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long, default_value_t = 1.0)]
        scale: f64,
        #[arg(long, default_value_t = 0.0)]
        offset: f64,
    },
    /// Drops every appearance (global and local) and clears surface-data targets.
    RemoveApps {
        #[command(flatten)]
        io: CommonIo,
    },
    /// Converts global appearances into per-feature local appearances.
    ToLocalApps {
        #[command(flatten)]
        io: CommonIo,
        /// Attach to the owning top-level object instead of the nearest nested feature.
        #[arg(long)]
        top_level: bool,
    },
    /// Clips every ParameterizedTexture to its UV bounding box.
    ClipTextures {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long, default_value = "clipped_textures")]
        texture_folder: String,
        #[arg(long, default_value = "tex")]
        prefix: String,
        #[arg(long, default_value_t = 0)]
        bucket_count: u32,
        #[arg(long)]
        force_jpeg: bool,
        #[arg(long, default_value_t = 0.85)]
        jpeg_quality: f32,
        #[arg(long, default_value_t = 7)]
        precision: u32,
        #[arg(long)]
        clamp_out_of_range: bool,
    },
    /// Combines multiple input files into one document.
    Merge {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long, value_enum, default_value = "keep-top-level")]
        identity_mode: IdentityModeArg,
    },
    /// Retains only the top-level objects intersecting a bounding box.
    Subset {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long, num_args = 6, value_names = ["MINX", "MINY", "MINZ", "MAXX", "MAXY", "MAXZ"])]
        bbox: Vec<f64>,
        #[arg(long)]
        no_remove_group_members: bool,
    },
    /// Selects which LoD representations to keep or remove.
    FilterLods {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long = "lod", num_args = 1..)]
        lods: Vec<u8>,
        #[arg(long, value_enum, default_value = "keep")]
        mode: LodFilterModeArg,
        #[arg(long)]
        keep_empty_objects: bool,
        #[arg(long)]
        update_extents: bool,
    },
    /// Transforms every coordinate from its effective source CRS to a target CRS.
    Reproject {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long)]
        target_crs: String,
        #[arg(long)]
        target_longitude_first: bool,
        #[arg(long)]
        keep_height_values: bool,
        #[arg(long)]
        fallback_srs: Option<String>,
    },
    /// Converts CityJSON (or CityJSON-Lines) input into CityGML.
    FromCityjson {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long)]
        lines: bool,
    },
    /// Converts CityGML input into CityJSON (or CityJSON-Lines).
    ToCityjson {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long)]
        lines: bool,
        #[arg(long, value_enum, default_value = "maximum")]
        lod_mapping_mode: LodSelectionModeArg,
    },
    /// Upgrades a CityGML 1.0/2.0 document to the 3.0 data model.
    Upgrade {
        #[command(flatten)]
        io: CommonIo,
        /// Inserts a CityObjectRelation on both sides of a resolved cross-top-level
        /// geometry share.
        #[arg(short = 'a', long = "add-object-relations")]
        add_object_relations: bool,
        #[arg(long, default_value_t = true)]
        map_lod1_multi_surfaces: bool,
        #[arg(long, default_value_t = true)]
        map_lod0_roof_edge: bool,
        #[arg(long, default_value_t = true)]
        use_lod4_as_lod3: bool,
    },
    /// Applies an external XSLT stylesheet to each input document.
    ApplyXslt {
        #[command(flatten)]
        io: CommonIo,
        #[arg(long)]
        stylesheet: PathBuf,
    },
    /// Runs schema-free structural checks and reports warnings/errors.
    Validate {
        #[command(flatten)]
        io: CommonIo,
    },
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum IdentityModeArg {
    KeepAll,
    KeepTopLevel,
    RegenerateAll,
}

impl From<IdentityModeArg> for IdentityMode {
    fn from(value: IdentityModeArg) -> Self {
        match value {
            IdentityModeArg::KeepAll => IdentityMode::KeepAll,
            IdentityModeArg::KeepTopLevel => IdentityMode::KeepTopLevel,
            IdentityModeArg::RegenerateAll => IdentityMode::RegenerateAll,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LodFilterModeArg {
    Keep,
    Remove,
    Minimum,
    Maximum,
    MinimumOrLess,
    MaximumOrGreater,
}

impl From<LodFilterModeArg> for LodFilterMode {
    fn from(value: LodFilterModeArg) -> Self {
        match value {
            LodFilterModeArg::Keep => LodFilterMode::Keep,
            LodFilterModeArg::Remove => LodFilterMode::Remove,
            LodFilterModeArg::Minimum => LodFilterMode::Minimum,
            LodFilterModeArg::Maximum => LodFilterMode::Maximum,
            LodFilterModeArg::MinimumOrLess => LodFilterMode::MinimumOrLess,
            LodFilterModeArg::MaximumOrGreater => LodFilterMode::MaximumOrGreater,
        }
    }
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum LodSelectionModeArg {
    Maximum,
    Minimum,
}
