use super::{FieldRole, FieldSpec, FlagGroup, ValueKind};

const fn identifier(public: &'static str, internal: &'static str) -> FieldSpec {
    FieldSpec {
        public,
        internal,
        kind: ValueKind::WildcardList,
        role: FieldRole::Identifier,
        group: None,
    }
}

const fn option(public: &'static str, kind: ValueKind) -> FieldSpec {
    FieldSpec {
        public,
        internal: public,
        kind,
        role: FieldRole::Option,
        group: None,
    }
}

const fn metric(public: &'static str, internal: &'static str, kind: ValueKind) -> FieldSpec {
    FieldSpec {
        public,
        internal,
        kind,
        role: FieldRole::Metric,
        group: None,
    }
}

const fn flag(public: &'static str, internal: &'static str, group: FlagGroup) -> FieldSpec {
    FieldSpec {
        public,
        internal,
        kind: ValueKind::Float,
        role: FieldRole::Metric,
        group: Some(group),
    }
}

/// Every public query key the service understands.
pub(crate) static FIELDS: &[FieldSpec] = &[
    // Stream identifiers
    identifier("network", "net"),
    identifier("net", "net"),
    identifier("station", "sta"),
    identifier("sta", "sta"),
    identifier("location", "loc"),
    identifier("loc", "loc"),
    identifier("channel", "cha"),
    identifier("cha", "cha"),
    // Time window
    FieldSpec {
        public: "starttime",
        internal: "ts",
        kind: ValueKind::String,
        role: FieldRole::StartTime,
        group: None,
    },
    FieldSpec {
        public: "start",
        internal: "ts",
        kind: ValueKind::String,
        role: FieldRole::StartTime,
        group: None,
    },
    FieldSpec {
        public: "endtime",
        internal: "te",
        kind: ValueKind::String,
        role: FieldRole::EndTime,
        group: None,
    },
    FieldSpec {
        public: "end",
        internal: "te",
        kind: ValueKind::String,
        role: FieldRole::EndTime,
        group: None,
    },
    // Service options
    option("include", ValueKind::String),
    option("longestonly", ValueKind::String),
    option("csegments", ValueKind::String),
    option("minlen", ValueKind::Float),
    option("format", ValueKind::String),
    option("gran", ValueKind::String),
    // Record metadata
    metric("quality", "qlt", ValueKind::String),
    metric("encoding", "enc", ValueKind::StringList),
    metric("sample_rate", "srate", ValueKind::FloatList),
    metric("record_length", "rlen", ValueKind::IntList),
    metric("num_records", "nrec", ValueKind::Int),
    metric("num_samples", "nsam", ValueKind::Int),
    // Sample statistics
    metric("sample_min", "smin", ValueKind::Int),
    metric("sample_max", "smax", ValueKind::Int),
    metric("sample_mean", "smean", ValueKind::Float),
    metric("sample_median", "smedian", ValueKind::Float),
    metric("sample_stdev", "stdev", ValueKind::Float),
    metric("sample_rms", "rms", ValueKind::Float),
    metric("sample_upper_quartile", "supper", ValueKind::Float),
    metric("sample_lower_quartile", "slower", ValueKind::Float),
    // Gaps, overlaps and availability
    metric("num_gaps", "ngaps", ValueKind::Int),
    metric("sum_gaps", "glen", ValueKind::Float),
    metric("max_gap", "gmax", ValueKind::Float),
    metric("num_overlaps", "nover", ValueKind::Int),
    metric("sum_overlaps", "olen", ValueKind::Float),
    metric("max_overlap", "omax", ValueKind::Float),
    metric("percent_availability", "avail", ValueKind::Float),
    // Timing quality
    metric("timing_correction", "tcorr", ValueKind::Float),
    metric("timing_quality_min", "tqmin", ValueKind::Float),
    metric("timing_quality_max", "tqmax", ValueKind::Float),
    metric("timing_quality_mean", "tqmean", ValueKind::Float),
    metric("timing_quality_median", "tqmedian", ValueKind::Float),
    metric("timing_quality_upper_quartile", "tqupper", ValueKind::Float),
    metric("timing_quality_lower_quartile", "tqlower", ValueKind::Float),
    // Data quality flag percentages
    flag("amplifier_saturation", "asa", FlagGroup::DataQuality),
    flag("digitizer_clipping", "dic", FlagGroup::DataQuality),
    flag("spikes", "spi", FlagGroup::DataQuality),
    flag("glitches", "gli", FlagGroup::DataQuality),
    flag("missing_padded_data", "mpd", FlagGroup::DataQuality),
    flag("telemetry_sync_error", "tse", FlagGroup::DataQuality),
    flag("digital_filter_charging", "dfc", FlagGroup::DataQuality),
    flag("suspect_time_tag", "stt", FlagGroup::DataQuality),
    // Activity flag percentages
    flag("calibration_signal", "cas", FlagGroup::Activity),
    flag("time_correction_applied", "tca", FlagGroup::Activity),
    flag("event_begin", "evb", FlagGroup::Activity),
    flag("event_end", "eve", FlagGroup::Activity),
    flag("event_in_progress", "eip", FlagGroup::Activity),
    flag("positive_leap", "pol", FlagGroup::Activity),
    flag("negative_leap", "nel", FlagGroup::Activity),
    // I/O and clock flag percentages
    flag("station_volume", "svo", FlagGroup::IoClock),
    flag("long_record_read", "lrr", FlagGroup::IoClock),
    flag("short_record_read", "srr", FlagGroup::IoClock),
    flag("start_time_series", "sts", FlagGroup::IoClock),
    flag("end_time_series", "ets", FlagGroup::IoClock),
    flag("clock_locked", "clo", FlagGroup::IoClock),
];

/// Accepted data quality codes.
pub const QUALITY_CODES: [&str; 5] = ["D", "R", "Q", "M", "B"];
