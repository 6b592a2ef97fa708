use std::collections::BTreeMap;
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tempfile::NamedTempFile;

use formatry::dispatch::{read_records_with, read_with, write_records_with, write_with};
use formatry::registry::{Record, RecordIter, Registry, RegistryError, Role};
use formatry::sniff::{guess_format_with, SniffError};
use formatry::stream::{ReadHandle, Sink, Source, WriteMode};
use formatry::{Extras, FormatError, ReadError, Target, WriteError};

// ── helpers ──────────────────────────────────────────────────────────────────

/// Identifier claiming streams whose first byte equals `byte`.
fn byte_identifier(
    byte: u8,
) -> impl Fn(&mut ReadHandle<'_>) -> std::io::Result<bool> + Send + Sync + 'static {
    move |fh| {
        let mut buf = [0u8; 1];
        let n = fh.read(&mut buf)?;
        Ok(n == 1 && buf[0] == byte)
    }
}

fn upper_reader(fh: &mut ReadHandle<'_>, _extras: &Extras) -> Result<String, FormatError> {
    let mut text = String::new();
    fh.read_to_string(&mut text)?;
    Ok(text.to_uppercase())
}

fn upper_writer(
    value: &String,
    fh: &mut formatry::WriteHandle<'_>,
    _extras: &Extras,
) -> Result<(), FormatError> {
    fh.write_all(value.to_uppercase().as_bytes())?;
    Ok(())
}

// ── Registration + lookup ────────────────────────────────────────────────────

#[test]
fn test_register_and_get_identifier() {
    let mut reg = Registry::new();
    reg.register_identifier("alpha", byte_identifier(b'A')).unwrap();

    let ident = reg.get_identifier("alpha").expect("identifier registered");
    let mut cursor = Cursor::new(b"Abc".to_vec());
    let mut fh = ReadHandle::acquire(Source::stream(&mut cursor)).unwrap();
    assert!(ident(&mut fh).unwrap());

    assert!(reg.get_identifier("missing").is_none());
}

#[test]
fn test_duplicate_identifier_rejected() {
    let mut reg = Registry::new();
    reg.register_identifier("alpha", byte_identifier(b'A')).unwrap();
    let err = reg
        .register_identifier("alpha", byte_identifier(b'B'))
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::DuplicateIdentifier { format } if format == "alpha"
    ));

    // The original identifier survives the failed attempt.
    let ident = reg.get_identifier("alpha").unwrap();
    let mut cursor = Cursor::new(b"A".to_vec());
    let mut fh = ReadHandle::acquire(Source::stream(&mut cursor)).unwrap();
    assert!(ident(&mut fh).unwrap());
}

#[test]
fn test_reader_and_writer_roles_do_not_collide() {
    let mut reg = Registry::new();
    reg.register_reader::<String>("upper", upper_reader).unwrap();
    // Same (format, target), different role — fine.
    reg.register_writer::<String>("upper", upper_writer).unwrap();

    assert!(reg.get_reader::<String>("upper").is_some());
    assert!(reg.get_writer::<String>("upper").is_some());
}

#[test]
fn test_duplicate_reader_rejected() {
    let mut reg = Registry::new();
    reg.register_reader::<String>("upper", upper_reader).unwrap();
    let err = reg
        .register_reader::<String>("upper", upper_reader)
        .unwrap_err();
    assert!(matches!(
        err,
        RegistryError::DuplicateBinding { format, role: Role::Reader, .. } if format == "upper"
    ));
}

#[test]
fn test_same_format_different_targets_coexist() {
    let mut reg = Registry::new();
    reg.register_reader::<String>("multi", upper_reader).unwrap();
    reg.register_reader::<Vec<u8>>("multi", |fh, _extras| {
        let mut bytes = Vec::new();
        fh.read_to_end(&mut bytes)?;
        Ok(bytes)
    })
    .unwrap();

    assert!(reg.get_reader::<String>("multi").is_some());
    assert!(reg.get_reader::<Vec<u8>>("multi").is_some());
    assert!(reg.get_reader::<u32>("multi").is_none());
}

#[test]
fn test_empty_format_name_rejected() {
    let mut reg = Registry::new();
    assert!(matches!(
        reg.register_identifier("", byte_identifier(b'A')),
        Err(RegistryError::EmptyFormatName)
    ));
    assert!(matches!(
        reg.register_reader::<String>("", upper_reader),
        Err(RegistryError::EmptyFormatName)
    ));
}

#[test]
fn test_list_read_and_write_formats() {
    let mut reg = Registry::new();
    reg.register_reader::<String>("b-fmt", upper_reader).unwrap();
    reg.register_reader::<String>("a-fmt", upper_reader).unwrap();
    reg.register_writer::<String>("a-fmt", upper_writer).unwrap();
    reg.register_reader::<Vec<u8>>("c-fmt", |fh, _extras| {
        let mut bytes = Vec::new();
        fh.read_to_end(&mut bytes)?;
        Ok(bytes)
    })
    .unwrap();

    assert_eq!(
        reg.list_read_formats(Target::of::<String>()),
        vec!["a-fmt".to_string(), "b-fmt".to_string()]
    );
    assert_eq!(
        reg.list_write_formats(Target::of::<String>()),
        vec!["a-fmt".to_string()]
    );
    assert_eq!(
        reg.list_read_formats(Target::of::<Vec<u8>>()),
        vec!["c-fmt".to_string()]
    );
    assert!(reg.list_read_formats(Target::Records).is_empty());
}

// ── Sniffing ─────────────────────────────────────────────────────────────────

#[test]
fn test_guess_format_single_match() {
    let mut reg = Registry::new();
    reg.register_identifier("alpha", byte_identifier(b'A')).unwrap();
    reg.register_identifier("beta", byte_identifier(b'B')).unwrap();

    let mut cursor = Cursor::new(b"B data".to_vec());
    let format = guess_format_with(&reg, Source::stream(&mut cursor), None).unwrap();
    assert_eq!(format, "beta");

    // The stream was rewound, not consumed.
    assert_eq!(cursor.position(), 0);
}

#[test]
fn test_guess_format_no_match() {
    let mut reg = Registry::new();
    reg.register_identifier("alpha", byte_identifier(b'A')).unwrap();

    let mut cursor = Cursor::new(b"zzz".to_vec());
    let err = guess_format_with(&reg, Source::stream(&mut cursor), None).unwrap_err();
    assert!(matches!(err, SniffError::NoMatch { .. }));
}

#[test]
fn test_no_match_error_names_the_input() {
    let mut reg = Registry::new();
    reg.register_identifier("alpha", byte_identifier(b'A')).unwrap();

    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(b"zzz").unwrap();
    tmp.flush().unwrap();

    let err = guess_format_with(&reg, Source::from(tmp.path()), None).unwrap_err();
    assert!(matches!(err, SniffError::NoMatch { .. }));
    assert!(err.to_string().contains(tmp.path().to_str().unwrap()));
}

#[test]
fn test_guess_format_ambiguous_names_all_candidates() {
    let mut reg = Registry::new();
    reg.register_identifier("alpha", byte_identifier(b'A')).unwrap();
    reg.register_identifier("alef", byte_identifier(b'A')).unwrap();
    reg.register_identifier("beta", byte_identifier(b'B')).unwrap();

    let mut cursor = Cursor::new(b"A".to_vec());
    let err = guess_format_with(&reg, Source::stream(&mut cursor), None).unwrap_err();
    match err {
        SniffError::Ambiguous { candidates } => {
            assert_eq!(candidates, vec!["alef".to_string(), "alpha".to_string()]);
        }
        other => panic!("expected Ambiguous, got {other:?}"),
    }
}

#[test]
fn test_guess_format_restricted_by_target() {
    let mut reg = Registry::new();
    reg.register_identifier("alpha", byte_identifier(b'A')).unwrap();
    reg.register_identifier("also-a", byte_identifier(b'A')).unwrap();
    // Only "alpha" has a String reader, so a String-targeted sniff is not
    // ambiguous even though both identifiers claim the stream.
    reg.register_reader::<String>("alpha", upper_reader).unwrap();

    let mut cursor = Cursor::new(b"A".to_vec());
    let format = guess_format_with(
        &reg,
        Source::stream(&mut cursor),
        Some(Target::of::<String>()),
    )
    .unwrap();
    assert_eq!(format, "alpha");

    // Restricting to a target with no bindings at all finds nothing.
    let mut cursor = Cursor::new(b"A".to_vec());
    let err = guess_format_with(
        &reg,
        Source::stream(&mut cursor),
        Some(Target::of::<u32>()),
    )
    .unwrap_err();
    assert!(matches!(err, SniffError::NoMatch { .. }));
}

#[test]
fn test_identifiers_each_observe_stream_from_start() {
    let mut reg = Registry::new();
    // A greedy identifier that consumes the whole stream and rejects.
    reg.register_identifier("greedy", |fh| {
        let mut sink = Vec::new();
        fh.read_to_end(&mut sink)?;
        Ok(false)
    })
    .unwrap();
    reg.register_identifier("alpha", byte_identifier(b'A')).unwrap();

    let mut cursor = Cursor::new(b"A".to_vec());
    let format = guess_format_with(&reg, Source::stream(&mut cursor), None).unwrap();
    assert_eq!(format, "alpha");
}

// ── Typed read/write dispatch ────────────────────────────────────────────────

#[test]
fn test_read_invokes_reader_once_and_returns_value() {
    let mut reg = Registry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    let calls_in_reader = calls.clone();
    reg.register_reader::<String>("upper", move |fh, _extras| {
        calls_in_reader.fetch_add(1, Ordering::SeqCst);
        let mut text = String::new();
        fh.read_to_string(&mut text)?;
        Ok(text.to_uppercase())
    })
    .unwrap();

    let mut tmp = NamedTempFile::new().unwrap();
    tmp.write_all(b"hello registry").unwrap();
    tmp.flush().unwrap();

    let value: String = read_with(
        &reg,
        Source::from(tmp.path()),
        Some("upper"),
        &Extras::new(),
    )
    .unwrap();
    assert_eq!(value, "HELLO REGISTRY");
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_read_sniffs_when_format_omitted() {
    let mut reg = Registry::new();
    reg.register_identifier("upper", byte_identifier(b'h')).unwrap();
    reg.register_reader::<String>("upper", upper_reader).unwrap();

    let mut cursor = Cursor::new(b"hello".to_vec());
    let value: String =
        read_with(&reg, Source::stream(&mut cursor), None, &Extras::new()).unwrap();
    assert_eq!(value, "HELLO");
}

#[test]
fn test_read_no_reader_names_format_and_type() {
    let reg = Registry::new();
    let mut cursor = Cursor::new(b"x".to_vec());
    let err = read_with::<String>(
        &reg,
        Source::stream(&mut cursor),
        Some("ghost"),
        &Extras::new(),
    )
    .unwrap_err();
    match err {
        ReadError::NoReader { format, target } => {
            assert_eq!(format, "ghost");
            assert!(target.contains("String"));
        }
        other => panic!("expected NoReader, got {other:?}"),
    }
}

#[test]
fn test_write_roundtrip_via_borrowed_sink() {
    let mut reg = Registry::new();
    reg.register_writer::<String>("upper", upper_writer).unwrap();

    let mut out: Vec<u8> = Vec::new();
    write_with(
        &reg,
        &"quiet".to_string(),
        "upper",
        Sink::stream(&mut out),
        WriteMode::Truncate,
        &Extras::new(),
    )
    .unwrap();
    assert_eq!(out, b"QUIET");
}

#[test]
fn test_write_no_writer_names_format_and_destination() {
    let reg = Registry::new();
    let tmp = NamedTempFile::new().unwrap();
    let err = write_with(
        &reg,
        &"value".to_string(),
        "ghost",
        Sink::from(tmp.path()),
        WriteMode::Truncate,
        &Extras::new(),
    )
    .unwrap_err();
    match err {
        WriteError::NoWriter { format, destination } => {
            assert_eq!(format, "ghost");
            assert!(destination.contains(tmp.path().to_str().unwrap()));
        }
        other => panic!("expected NoWriter, got {other:?}"),
    }
    // The path-opened sink was released; the file is writable again.
    std::fs::write(tmp.path(), b"still usable").unwrap();
}

// ── Streaming read: release semantics ────────────────────────────────────────

/// Record iterator that owns the stream handle and bumps a counter when it
/// is dropped — i.e. when the stream is released.
struct ProbeIter<'a> {
    _fh: ReadHandle<'a>,
    drops: Arc<AtomicUsize>,
    left: u32,
}

impl Iterator for ProbeIter<'_> {
    type Item = Result<Record, FormatError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.left == 0 {
            return None;
        }
        self.left -= 1;
        Some(Ok(Box::new(self.left) as Record))
    }
}

impl Drop for ProbeIter<'_> {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::SeqCst);
    }
}

fn probe_registry(drops: &Arc<AtomicUsize>, records: u32) -> Registry {
    let mut reg = Registry::new();
    let drops = drops.clone();
    reg.register_record_reader("probe", move |fh, _extras| {
        Ok(Box::new(ProbeIter {
            _fh: fh,
            drops: drops.clone(),
            left: records,
        }) as RecordIter<'_>)
    })
    .unwrap();
    reg
}

#[test]
fn test_record_read_releases_stream_exactly_once_on_exhaustion() {
    let drops = Arc::new(AtomicUsize::new(0));
    let reg = probe_registry(&drops, 3);

    let mut cursor = Cursor::new(b"payload".to_vec());
    let mut records = read_records_with(
        &reg,
        Source::stream(&mut cursor),
        Some("probe"),
        &Extras::new(),
    )
    .unwrap();

    assert_eq!(drops.load(Ordering::SeqCst), 0, "no release before pulling");
    let pulled: Vec<_> = records.by_ref().collect();
    assert_eq!(pulled.len(), 3);

    // Released at exhaustion, while the sequence object is still alive.
    assert!(records.finished());
    assert_eq!(drops.load(Ordering::SeqCst), 1);

    // Dropping the sequence afterwards must not release again.
    drop(records);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_records_debug_reports_release_state() {
    let drops = Arc::new(AtomicUsize::new(0));
    let reg = probe_registry(&drops, 1);

    let mut cursor = Cursor::new(b"payload".to_vec());
    let mut records = read_records_with(
        &reg,
        Source::stream(&mut cursor),
        Some("probe"),
        &Extras::new(),
    )
    .unwrap();

    assert_eq!(format!("{records:?}"), "Records { finished: false }");
    records.by_ref().for_each(drop);
    assert_eq!(format!("{records:?}"), "Records { finished: true }");
}

#[test]
fn test_record_read_releases_stream_on_early_abandonment() {
    let drops = Arc::new(AtomicUsize::new(0));
    let reg = probe_registry(&drops, 100);

    let mut cursor = Cursor::new(b"payload".to_vec());
    let mut records = read_records_with(
        &reg,
        Source::stream(&mut cursor),
        Some("probe"),
        &Extras::new(),
    )
    .unwrap();

    assert!(records.next().is_some());
    assert_eq!(drops.load(Ordering::SeqCst), 0);

    // Abandon after one element: the drop of the sequence releases the
    // stream, exactly once.
    drop(records);
    assert_eq!(drops.load(Ordering::SeqCst), 1);
}

#[test]
fn test_record_read_releases_stream_on_element_error() {
    let drops = Arc::new(AtomicUsize::new(0));
    let mut reg = Registry::new();
    let drops_in_reader = drops.clone();
    reg.register_record_reader("failing", move |fh, _extras| {
        let probe = ProbeIter {
            _fh: fh,
            drops: drops_in_reader.clone(),
            left: 0,
        };
        Ok(Box::new(probe.chain(std::iter::once(Err(
            FormatError::malformed("failing", "boom"),
        )))) as RecordIter<'_>)
    })
    .unwrap();

    let mut cursor = Cursor::new(b"payload".to_vec());
    let mut records = read_records_with(
        &reg,
        Source::stream(&mut cursor),
        Some("failing"),
        &Extras::new(),
    )
    .unwrap();

    assert!(records.next().unwrap().is_err());
    assert!(records.finished());
    assert_eq!(drops.load(Ordering::SeqCst), 1);
    assert!(records.next().is_none());
}

#[test]
fn test_record_read_no_reader_for_records_slot() {
    let mut reg = Registry::new();
    // A typed reader does not satisfy the streaming slot.
    reg.register_reader::<String>("upper", upper_reader).unwrap();

    let mut cursor = Cursor::new(b"x".to_vec());
    let err = read_records_with(
        &reg,
        Source::stream(&mut cursor),
        Some("upper"),
        &Extras::new(),
    )
    .unwrap_err();
    match err {
        ReadError::NoReader { format, target } => {
            assert_eq!(format, "upper");
            assert_eq!(target, "records");
        }
        other => panic!("expected NoReader, got {other:?}"),
    }
}

// ── Built-in formats ─────────────────────────────────────────────────────────

fn builtin_registry() -> Registry {
    let mut reg = Registry::new();
    formatry::formats::register_builtins(&mut reg).unwrap();
    reg
}

#[test]
fn test_jsonl_typed_roundtrip_via_path() {
    let reg = builtin_registry();
    let values = vec![json!({"id": 1}), json!({"id": 2, "name": "two"}), json!([1, 2, 3])];

    let tmp = NamedTempFile::new().unwrap();
    write_with(
        &reg,
        &values,
        "jsonl",
        Sink::from(tmp.path()),
        WriteMode::Truncate,
        &Extras::new(),
    )
    .unwrap();

    let back: Vec<Value> =
        read_with(&reg, Source::from(tmp.path()), Some("jsonl"), &Extras::new()).unwrap();
    assert_eq!(back, values);
}

#[test]
fn test_jsonl_sniffed_streaming_read() {
    let reg = builtin_registry();
    let mut cursor = Cursor::new(b"{\"a\":1}\n\n{\"a\":2}\n".to_vec());

    let records = read_records_with(&reg, Source::stream(&mut cursor), None, &Extras::new())
        .unwrap();
    let values: Vec<Value> = records
        .map(|r| *r.unwrap().downcast::<Value>().unwrap())
        .collect();
    assert_eq!(values, vec![json!({"a": 1}), json!({"a": 2})]);
}

#[test]
fn test_jsonl_max_records_extra() {
    let reg = builtin_registry();
    let mut cursor = Cursor::new(b"{\"a\":1}\n{\"a\":2}\n{\"a\":3}\n".to_vec());

    let extras = Extras::new().with("max_records", 2);
    let values: Vec<Value> = read_with(
        &reg,
        Source::stream(&mut cursor),
        Some("jsonl"),
        &extras,
    )
    .unwrap();
    assert_eq!(values.len(), 2);
}

#[test]
fn test_jsonl_max_records_zero_reads_nothing_on_both_paths() {
    let reg = builtin_registry();
    let data = b"{\"a\":1}\n{\"a\":2}\n".to_vec();
    let extras = Extras::new().with("max_records", 0);

    let mut cursor = Cursor::new(data.clone());
    let typed: Vec<Value> =
        read_with(&reg, Source::stream(&mut cursor), Some("jsonl"), &extras).unwrap();
    assert!(typed.is_empty());

    let mut cursor = Cursor::new(data);
    let records = read_records_with(&reg, Source::stream(&mut cursor), Some("jsonl"), &extras)
        .unwrap();
    assert_eq!(records.count(), 0);
}

#[test]
fn test_kvconf_roundtrip_with_header() {
    let reg = builtin_registry();
    let mut map = BTreeMap::new();
    map.insert("host".to_string(), "localhost".to_string());
    map.insert("port".to_string(), "8080".to_string());

    let mut out: Vec<u8> = Vec::new();
    let extras = Extras::new().with("header", "generated");
    write_with(
        &reg,
        &map,
        "kvconf",
        Sink::stream(&mut out),
        WriteMode::Truncate,
        &extras,
    )
    .unwrap();
    let text = String::from_utf8(out.clone()).unwrap();
    assert!(text.starts_with("# generated\n"));

    let mut cursor = Cursor::new(out);
    let back: BTreeMap<String, String> = read_with(
        &reg,
        Source::stream(&mut cursor),
        Some("kvconf"),
        &Extras::new(),
    )
    .unwrap();
    assert_eq!(back, map);
}

#[test]
fn test_kvconf_sniffed_against_other_builtins() {
    let reg = builtin_registry();
    let mut cursor = Cursor::new(b"# config\nname = demo\n".to_vec());
    let format = guess_format_with(&reg, Source::stream(&mut cursor), None).unwrap();
    assert_eq!(format, "kvconf");
}

#[test]
fn test_binrec_roundtrip_and_sniff() {
    let reg = builtin_registry();
    let values = vec![json!({"seq": 1}), json!("plain string"), json!(42)];

    let mut out: Vec<u8> = Vec::new();
    write_with(
        &reg,
        &values,
        "binrec",
        Sink::stream(&mut out),
        WriteMode::Truncate,
        &Extras::new(),
    )
    .unwrap();
    assert_eq!(&out[..4], b"BRC1");

    let mut cursor = Cursor::new(out.clone());
    let format = guess_format_with(&reg, Source::stream(&mut cursor), None).unwrap();
    assert_eq!(format, "binrec");

    let mut cursor = Cursor::new(out);
    let back: Vec<Value> = read_with(
        &reg,
        Source::stream(&mut cursor),
        Some("binrec"),
        &Extras::new(),
    )
    .unwrap();
    assert_eq!(back, values);
}

#[test]
fn test_binrec_append_continues_the_stream() {
    let reg = builtin_registry();
    let first = vec![json!({"seq": 1})];
    let second = vec![json!({"seq": 2}), json!({"seq": 3})];

    let tmp = NamedTempFile::new().unwrap();
    write_with(
        &reg,
        &first,
        "binrec",
        Sink::from(tmp.path()),
        WriteMode::Truncate,
        &Extras::new(),
    )
    .unwrap();
    // Appending must continue the frame stream, not plant a second magic.
    write_with(
        &reg,
        &second,
        "binrec",
        Sink::from(tmp.path()),
        WriteMode::Append,
        &Extras::new(),
    )
    .unwrap();

    let back: Vec<Value> =
        read_with(&reg, Source::from(tmp.path()), Some("binrec"), &Extras::new()).unwrap();
    assert_eq!(
        back,
        vec![json!({"seq": 1}), json!({"seq": 2}), json!({"seq": 3})]
    );
}

#[test]
fn test_binrec_append_to_missing_file_writes_magic() {
    let reg = builtin_registry();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("fresh.brc");

    write_with(
        &reg,
        &vec![json!({"seq": 1})],
        "binrec",
        Sink::from(&path),
        WriteMode::Append,
        &Extras::new(),
    )
    .unwrap();

    assert_eq!(&std::fs::read(&path).unwrap()[..4], b"BRC1");
    let back: Vec<Value> =
        read_with(&reg, Source::from(&path), Some("binrec"), &Extras::new()).unwrap();
    assert_eq!(back, vec![json!({"seq": 1})]);
}

#[test]
fn test_binrec_checksum_mismatch_is_malformed() {
    let reg = builtin_registry();
    let values = vec![json!({"seq": 1})];

    let mut out: Vec<u8> = Vec::new();
    write_with(
        &reg,
        &values,
        "binrec",
        Sink::stream(&mut out),
        WriteMode::Truncate,
        &Extras::new(),
    )
    .unwrap();

    // Flip one payload byte; the frame CRC must catch it.
    let last = out.len() - 1;
    out[last] ^= 0xFF;
    let mut cursor = Cursor::new(out);
    let err = read_with::<Vec<Value>>(
        &reg,
        Source::stream(&mut cursor),
        Some("binrec"),
        &Extras::new(),
    )
    .unwrap_err();
    assert!(matches!(
        err,
        ReadError::Format(FormatError::Malformed { .. })
    ));
}

#[test]
fn test_streaming_convert_jsonl_to_binrec() {
    let reg = builtin_registry();
    let source_text = b"{\"n\":1}\n{\"n\":2}\n{\"n\":3}\n".to_vec();

    let mut input = Cursor::new(source_text);
    let mut records = read_records_with(
        &reg,
        Source::stream(&mut input),
        Some("jsonl"),
        &Extras::new(),
    )
    .unwrap();

    let mut converted: Vec<u8> = Vec::new();
    write_records_with(
        &reg,
        &mut records,
        "binrec",
        Sink::stream(&mut converted),
        WriteMode::Truncate,
        &Extras::new(),
    )
    .unwrap();

    let mut cursor = Cursor::new(converted);
    let back: Vec<Value> = read_with(
        &reg,
        Source::stream(&mut cursor),
        Some("binrec"),
        &Extras::new(),
    )
    .unwrap();
    assert_eq!(back, vec![json!({"n": 1}), json!({"n": 2}), json!({"n": 3})]);
}

#[test]
fn test_builtin_sniff_is_unambiguous_per_format() {
    let reg = builtin_registry();
    let samples: Vec<(&str, Vec<u8>)> = vec![
        ("jsonl", b"{\"k\":true}\n".to_vec()),
        ("kvconf", b"key = value\n".to_vec()),
        ("binrec", b"BRC1".to_vec()),
    ];
    for (expected, data) in samples {
        let mut cursor = Cursor::new(data);
        let format = guess_format_with(&reg, Source::stream(&mut cursor), None).unwrap();
        assert_eq!(format, expected);
    }
}

// ── Process-wide registry ────────────────────────────────────────────────────

#[test]
fn test_global_registry_roundtrip() {
    // Unique format name: the global registry is shared across tests.
    formatry::registry::register_identifier("globaltest-upper", byte_identifier(b'g')).unwrap();
    formatry::registry::register_reader::<String>("globaltest-upper", upper_reader).unwrap();

    assert!(formatry::registry::get_identifier("globaltest-upper").is_some());
    assert!(formatry::registry::get_reader::<String>("globaltest-upper").is_some());
    assert!(formatry::registry::list_read_formats(Target::of::<String>())
        .contains(&"globaltest-upper".to_string()));

    let mut cursor = Cursor::new(b"global".to_vec());
    let value: String = formatry::read(
        Source::stream(&mut cursor),
        Some("globaltest-upper"),
        &Extras::new(),
    )
    .unwrap();
    assert_eq!(value, "GLOBAL");

    let err = formatry::registry::register_identifier("globaltest-upper", byte_identifier(b'g'))
        .unwrap_err();
    assert!(matches!(err, RegistryError::DuplicateIdentifier { .. }));
}
