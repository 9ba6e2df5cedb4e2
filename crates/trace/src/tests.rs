use super::*;
use std::fs;
use tempfile::tempdir;

fn remote_whole(target_offset: usize) -> TraceRecord {
    TraceRecord::Fragment {
        shape: FragmentShape::Whole,
        remote: true,
        target_rank: 4,
        bytes: 64,
        local_offset: 0,
        target_offset,
    }
}

// -------------------- Formatting --------------------

#[test]
fn records_render_one_line_each() {
    let mut sink = TraceSink::from_writer(Vec::new());
    sink.record(&TraceRecord::Variable(1)).unwrap();
    sink.record(&TraceRecord::Level(3)).unwrap();
    sink.record(&remote_whole(128)).unwrap();
    sink.record(&TraceRecord::Fragment {
        shape: FragmentShape::Tail,
        remote: false,
        target_rank: 0,
        bytes: 8,
        local_offset: 16,
        target_offset: 0,
    })
    .unwrap();
    let out = String::from_utf8(sink.close().unwrap()).unwrap();

    assert_eq!(
        out,
        "variable 1\n\
         level 3\n\
         whole remote rank=4 bytes=64 local=0 target=128\n\
         tail local rank=0 bytes=8 local=16 target=0\n"
    );
}

#[test]
fn end_line_carries_checksum() {
    let owned = TraceRecord::End {
        owned: Some((0, 2, 1)),
        bytes: 512,
        crc32: 0x1c29_1ca3,
    };
    assert_eq!(owned.to_string(), "end owned=0/2/1 bytes=512 crc32=1c291ca3");

    let none = TraceRecord::End {
        owned: None,
        bytes: 0,
        crc32: 0,
    };
    assert_eq!(none.to_string(), "end owned=none");
}

// -------------------- Files --------------------

#[test]
fn open_creates_directory_and_per_rank_file() {
    let dir = tempdir().unwrap();
    let trace_dir = dir.path().join("nested").join("trace");

    let mut sink = TraceSink::open(&trace_dir, 7).unwrap();
    sink.record(&TraceRecord::Variable(0)).unwrap();
    sink.close().unwrap();

    let path = TraceSink::path_for(&trace_dir, 7);
    assert!(path.ends_with("rank_7"));
    assert_eq!(fs::read_to_string(path).unwrap(), "variable 0\n");
}

#[test]
fn reopening_appends() {
    let dir = tempdir().unwrap();

    for level in 0..2 {
        let mut sink = TraceSink::open(dir.path(), 0).unwrap();
        sink.record(&TraceRecord::Level(level)).unwrap();
        sink.close().unwrap();
    }

    let text = fs::read_to_string(TraceSink::path_for(dir.path(), 0)).unwrap();
    assert_eq!(text, "level 0\nlevel 1\n");
}

#[test]
fn open_fails_when_directory_is_a_file() {
    let dir = tempdir().unwrap();
    let blocker = dir.path().join("blocker");
    fs::write(&blocker, b"x").unwrap();

    let err = TraceSink::open(&blocker, 0).err().unwrap();
    assert!(matches!(err, TraceError::CreateDir { .. }));
}

#[test]
fn boxed_sink_writes_through_to_the_file() {
    let dir = tempdir().unwrap();

    let mut sink: BoxedTraceSink = TraceSink::open(dir.path(), 2).unwrap().boxed();
    sink.record(&TraceRecord::Variable(5)).unwrap();
    sink.close().unwrap();

    let text = fs::read_to_string(TraceSink::path_for(dir.path(), 2)).unwrap();
    assert_eq!(text, "variable 5\n");
}
