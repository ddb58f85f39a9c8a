//! Shapes stored records into the public document layout for each
//! inclusion level.

use crate::registry::{FlagGroup, TypeRegistry};
use crate::request::IncludeLevel;
use crate::store::{Document, Projection, STREAM_ID};
use serde_json::{Map, Value};

pub const DOCUMENT_ID: &str = "_id";
/// Set when the day holds a single continuous trace.
pub const CONTINUOUS: &str = "cont";
pub const HEADER_SECTION: &str = "miniseed_header_percentages";
pub const SEGMENTS_SECTION: &str = "c_segments";

/// Ingester bookkeeping never returned to clients.
const BOOKKEEPING: [&str; 6] = ["fileId", "files", "created", "collector", "status", "type"];

struct OutputField {
    internal: &'static str,
    public: &'static str,
    level: IncludeLevel,
}

const fn field(internal: &'static str, public: &'static str, level: IncludeLevel) -> OutputField {
    OutputField {
        internal,
        public,
        level,
    }
}

static DAILY_FIELDS: &[OutputField] = &[
    field("net", "network", IncludeLevel::Default),
    field("sta", "station", IncludeLevel::Default),
    field("loc", "location", IncludeLevel::Default),
    field("cha", "channel", IncludeLevel::Default),
    field("qlt", "quality", IncludeLevel::Default),
    field("ts", "start_time", IncludeLevel::Default),
    field("te", "end_time", IncludeLevel::Default),
    field("format", "format", IncludeLevel::Default),
    field("enc", "encoding", IncludeLevel::Default),
    field("srate", "sample_rate", IncludeLevel::Default),
    field("rlen", "record_length", IncludeLevel::Default),
    field("nrec", "num_records", IncludeLevel::Default),
    field("ngaps", "num_gaps", IncludeLevel::Default),
    field("glen", "sum_gaps", IncludeLevel::Default),
    field("gmax", "max_gap", IncludeLevel::Default),
    field("nover", "num_overlaps", IncludeLevel::Default),
    field("olen", "sum_overlaps", IncludeLevel::Default),
    field("omax", "max_overlap", IncludeLevel::Default),
    field("avail", "percent_availability", IncludeLevel::Default),
    field("nsam", "num_samples", IncludeLevel::Sample),
    field("smin", "sample_min", IncludeLevel::Sample),
    field("smax", "sample_max", IncludeLevel::Sample),
    field("smean", "sample_mean", IncludeLevel::Sample),
    field("smedian", "sample_median", IncludeLevel::Sample),
    field("stdev", "sample_stdev", IncludeLevel::Sample),
    field("rms", "sample_rms", IncludeLevel::Sample),
    field("supper", "sample_upper_quartile", IncludeLevel::Sample),
    field("slower", "sample_lower_quartile", IncludeLevel::Sample),
    field("sgap", "start_gap", IncludeLevel::All),
    field("egap", "end_gap", IncludeLevel::All),
    field("cont", "continuous", IncludeLevel::All),
    field("nseg", "num_segments", IncludeLevel::All),
    field("warnings", "warnings", IncludeLevel::All),
];

/// Timing metrics grouped with the flag percentages in the header section.
static TIMING_FIELDS: &[(&str, &str)] = &[
    ("tcorr", "timing_correction"),
    ("tqmin", "timing_quality_min"),
    ("tqmax", "timing_quality_max"),
    ("tqmean", "timing_quality_mean"),
    ("tqmedian", "timing_quality_median"),
    ("tqupper", "timing_quality_upper_quartile"),
    ("tqlower", "timing_quality_lower_quartile"),
];

static SEGMENT_FIELDS: &[(&str, &str)] = &[
    ("ts", "start_time"),
    ("te", "end_time"),
    ("slen", "segment_length"),
    ("srate", "sample_rate"),
    ("nsam", "num_samples"),
    ("smin", "sample_min"),
    ("smax", "sample_max"),
    ("smean", "sample_mean"),
    ("smedian", "sample_median"),
    ("stdev", "sample_stdev"),
    ("rms", "sample_rms"),
    ("supper", "sample_upper_quartile"),
    ("slower", "sample_lower_quartile"),
];

/// Fields to fetch for a level. The record id and continuity marker are
/// always needed to drive the child join.
pub fn daily_projection(level: IncludeLevel) -> Projection {
    if level == IncludeLevel::All {
        return Projection::ExcludeOnly(BOOKKEEPING.iter().map(|f| f.to_string()).collect());
    }

    let mut fields: Vec<String> = DAILY_FIELDS
        .iter()
        .filter(|f| f.level <= level)
        .map(|f| f.internal.to_string())
        .collect();
    if level >= IncludeLevel::Header {
        fields.extend(TIMING_FIELDS.iter().map(|(internal, _)| internal.to_string()));
        fields.extend(FlagGroup::ALL.iter().map(|group| group.internal().to_string()));
    }
    fields.push(DOCUMENT_ID.to_string());
    fields.push(CONTINUOUS.to_string());
    Projection::Include(fields)
}

fn header_section(registry: &TypeRegistry, document: &Document) -> Value {
    let mut section = Map::new();

    for (internal, public) in TIMING_FIELDS {
        if let Some(value) = document.get(*internal) {
            section.insert(public.to_string(), value.clone());
        }
    }

    for group in FlagGroup::ALL {
        let Some(Value::Object(stored)) = document.get(group.internal()) else {
            continue;
        };
        let flags: Map<String, Value> = registry
            .flags(group)
            .filter_map(|spec| {
                stored
                    .get(spec.internal)
                    .map(|value| (spec.public.to_string(), value.clone()))
            })
            .collect();
        section.insert(group.public().to_string(), Value::Object(flags));
    }

    Value::Object(section)
}

fn is_consumed(key: &str) -> bool {
    key == DOCUMENT_ID
        || key == STREAM_ID
        || BOOKKEEPING.contains(&key)
        || DAILY_FIELDS.iter().any(|f| f.internal == key)
        || TIMING_FIELDS.iter().any(|(internal, _)| *internal == key)
        || FlagGroup::ALL.iter().any(|group| group.internal() == key)
}

/// Renders a daily record with public names. At `All`, unmapped fields are
/// passed through untouched.
pub fn render_daily(registry: &TypeRegistry, document: &Document, level: IncludeLevel) -> Document {
    let mut rendered = Map::new();

    for field in DAILY_FIELDS.iter().filter(|f| f.level <= level) {
        if let Some(value) = document.get(field.internal) {
            rendered.insert(field.public.to_string(), value.clone());
        }
    }

    if level >= IncludeLevel::Header {
        rendered.insert(HEADER_SECTION.to_string(), header_section(registry, document));
    }

    if level == IncludeLevel::All {
        for (key, value) in document.iter().filter(|(key, _)| !is_consumed(key)) {
            rendered.insert(key.clone(), value.clone());
        }
    }

    rendered
}

pub fn render_segment(document: &Document) -> Value {
    let rendered: Map<String, Value> = SEGMENT_FIELDS
        .iter()
        .filter_map(|(internal, public)| {
            document
                .get(*internal)
                .map(|value| (public.to_string(), value.clone()))
        })
        .collect();
    Value::Object(rendered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn record() -> Document {
        json!({
            "_id": 7,
            "fileId": "NL.HGN.02.BHZ.D.2016.001",
            "created": "2016-01-02T00:00:00.000Z",
            "cont": false,
            "nseg": 2,
            "net": "NL",
            "sta": "HGN",
            "loc": "02",
            "cha": "BHZ",
            "qlt": "D",
            "ts": "2016-01-01T00:00:00.000Z",
            "te": "2016-01-02T00:00:00.000Z",
            "enc": ["STEIM2"],
            "smean": 10.5,
            "tcorr": 0.0,
            "dq_flags": {"spi": 1.5, "gli": 0.0},
            "io_flags": {"clo": 100.0},
            "ac_flags": {},
            "extra": "kept"
        })
        .as_object()
        .unwrap()
        .clone()
    }

    #[test]
    fn test_projection_by_level() {
        let Projection::Include(fields) = daily_projection(IncludeLevel::Default) else {
            panic!("default level uses an include list");
        };
        assert!(fields.contains(&"net".to_string()));
        assert!(fields.contains(&"_id".to_string()));
        assert!(fields.contains(&"cont".to_string()));
        assert!(!fields.contains(&"smean".to_string()));

        let Projection::Include(fields) = daily_projection(IncludeLevel::Header) else {
            panic!("header level uses an include list");
        };
        assert!(fields.contains(&"smean".to_string()));
        assert!(fields.contains(&"dq_flags".to_string()));

        assert!(matches!(
            daily_projection(IncludeLevel::All),
            Projection::ExcludeOnly(_)
        ));
    }

    #[test]
    fn test_render_default_uses_public_names() {
        let registry = TypeRegistry::new();
        let rendered = render_daily(&registry, &record(), IncludeLevel::Default);

        assert_eq!(rendered["network"], json!("NL"));
        assert_eq!(rendered["start_time"], json!("2016-01-01T00:00:00.000Z"));
        assert!(!rendered.contains_key("sample_mean"));
        assert!(!rendered.contains_key("_id"));
        assert!(!rendered.contains_key(HEADER_SECTION));
    }

    #[test]
    fn test_render_header_section() {
        let registry = TypeRegistry::new();
        let rendered = render_daily(&registry, &record(), IncludeLevel::Header);

        assert_eq!(rendered["sample_mean"], json!(10.5));
        let header = &rendered[HEADER_SECTION];
        assert_eq!(header["timing_correction"], json!(0.0));
        assert_eq!(header["data_quality_flags"]["spikes"], json!(1.5));
        assert_eq!(header["io_and_clock_flags"]["clock_locked"], json!(100.0));
        assert_eq!(header["activity_flags"], json!({}));
    }

    #[test]
    fn test_render_all_hides_only_bookkeeping() {
        let registry = TypeRegistry::new();
        let rendered = render_daily(&registry, &record(), IncludeLevel::All);

        assert_eq!(rendered["continuous"], json!(false));
        assert_eq!(rendered["num_segments"], json!(2));
        assert_eq!(rendered["extra"], json!("kept"));
        assert!(!rendered.contains_key("fileId"));
        assert!(!rendered.contains_key("created"));
        assert!(!rendered.contains_key("dq_flags"));
        assert!(!rendered.contains_key("_id"));
    }

    #[test]
    fn test_render_segment() {
        let segment = json!({"streamId": 7, "slen": 3600.0, "ts": "2016-01-01T00:00:00.000Z", "smean": 2.0});
        let rendered = render_segment(segment.as_object().unwrap());
        assert_eq!(
            rendered,
            json!({"segment_length": 3600.0, "start_time": "2016-01-01T00:00:00.000Z", "sample_mean": 2.0})
        );
    }
}
