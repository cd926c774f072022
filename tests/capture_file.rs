//! End-to-end tests driving `CaptureFile` over synthetic pcap files.

mod common;

use std::cell::RefCell;
use std::fs;
use std::rc::Rc;

use capfile::capture::{
    ByteEncoding, ByteMatch, CaptureFile, FileState, Outcome, PacketRange, SaveOptions,
    SearchDirection, SearchKind, SearchResult,
};
use capfile::config::Preferences;
use capfile::dissect::{Dissection, FrameContext, ProtocolStats, Tap};
use capfile::events::CaptureEvent;
use capfile::frame::CommentChange;
use capfile::io::{Compression, FileFormat, MergeMode};
use capfile::progress::StopFlag;
use capfile::Error;

use common::{append_pcap, mixed_packets, pcap_in, read_file, udp_packet, TestPacket};

fn count_events(cf: &mut CaptureFile, wanted: CaptureEvent) -> Rc<RefCell<usize>> {
    let counter = Rc::new(RefCell::new(0));
    let sink = Rc::clone(&counter);
    cf.events_mut().subscribe(move |e| {
        if *e == wanted {
            *sink.borrow_mut() += 1;
        }
    });
    counter
}

fn frame_nums(cf: &CaptureFile) -> Vec<u64> {
    cf.frames().iter().map(|f| f.num).collect()
}

// ============================================================================
// Reading
// ============================================================================

#[test]
fn test_frames_numbered_from_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);

    assert_eq!(cf.state(), FileState::ReadDone);
    assert_eq!(cf.count(), 5);
    assert_eq!(frame_nums(&cf), vec![1, 2, 3, 4, 5]);
    assert_eq!(cf.format(), Some(FileFormat::Pcap));

    cf.redissect_packets().unwrap();
    cf.filter_packets("tcp", false).unwrap();
    assert_eq!(frame_nums(&cf), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_read_filter_drops_records() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = CaptureFile::new(Preferences::default());
    cf.set_read_filter("udp").unwrap();
    cf.open(&path, None).unwrap();
    cf.read(false).unwrap();

    assert_eq!(cf.count(), 3);
    assert_eq!(frame_nums(&cf), vec![1, 2, 3]);
    assert_eq!(cf.displayed_count(), 3);
}

/// Raises the stop flag once it has seen `after` frames.
struct StopAfter {
    seen: u64,
    after: u64,
    stop: StopFlag,
}

impl Tap for StopAfter {
    fn name(&self) -> &'static str {
        "stop-after"
    }

    fn reset(&mut self) {
        self.seen = 0;
    }

    fn packet(&mut self, _frame: &FrameContext, _dissection: &Dissection) {
        self.seen += 1;
        if self.seen == self.after {
            self.stop.stop();
        }
    }
}

#[test]
fn test_stopped_read_keeps_frames_so_far() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = CaptureFile::new(Preferences::default());
    let stop = cf.stop_flag();
    cf.taps_mut().register(Box::new(StopAfter { seen: 0, after: 3, stop }));
    cf.open(&path, None).unwrap();

    let outcome = cf.read(false).unwrap();
    assert_eq!(outcome, Outcome::Aborted);
    assert_eq!(cf.count(), 3);
    assert_eq!(cf.state(), FileState::ReadAborted);
    // The flag is consumed by the operation that observed it.
    assert!(!cf.stop_flag().is_set());
}

#[test]
fn test_tail_picks_up_appended_records() {
    let dir = tempfile::tempdir().unwrap();
    let packets = mixed_packets();
    let path = pcap_in(dir.path(), "live.pcap", &packets[..2]);
    let mut cf = CaptureFile::new(Preferences::default());
    let added = count_events(&mut cf, CaptureEvent::TailFramesAdded { count: 3 });
    cf.open(&path, None).unwrap();

    assert_eq!(cf.continue_tail(None).unwrap(), 2);
    assert_eq!(cf.state(), FileState::ReadInProgress);
    assert_eq!(cf.continue_tail(None).unwrap(), 0);

    append_pcap(&path, &packets[2..]);
    assert_eq!(cf.continue_tail(None).unwrap(), 3);
    assert_eq!(*added.borrow(), 1);

    assert_eq!(cf.finish_tail().unwrap(), Outcome::Completed);
    assert_eq!(cf.state(), FileState::ReadDone);
    assert_eq!(frame_nums(&cf), vec![1, 2, 3, 4, 5]);
}

#[test]
fn test_stopped_tail_can_be_finished() {
    let dir = tempfile::tempdir().unwrap();
    let packets = mixed_packets();
    let path = pcap_in(dir.path(), "live.pcap", &packets[..3]);
    let mut cf = CaptureFile::new(Preferences::default());
    cf.open(&path, None).unwrap();
    assert_eq!(cf.continue_tail(None).unwrap(), 3);

    append_pcap(&path, &packets[3..]);
    cf.stop_flag().stop();
    assert_eq!(cf.continue_tail(None).unwrap(), 0);
    assert_eq!(cf.state(), FileState::ReadAborted);
    assert!(!cf.stop_flag().is_set());

    assert_eq!(cf.finish_tail().unwrap(), Outcome::Aborted);
    assert_eq!(cf.state(), FileState::ReadAborted);
    assert_eq!(cf.count(), 3);

    // Later operations are not cancelled by the consumed flag.
    assert_eq!(cf.filter_packets("udp", false).unwrap(), Outcome::Completed);
    assert_eq!(cf.displayed_count(), 2);
}

#[test]
fn test_reload_keeps_display_filter() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    cf.filter_packets("udp", false).unwrap();
    assert_eq!(cf.displayed_count(), 3);

    cf.reload().unwrap();
    assert_eq!(cf.count(), 5);
    assert_eq!(cf.display_filter_text(), "udp");
    assert_eq!(cf.displayed_count(), 3);
}

// ============================================================================
// Filtering and rescanning
// ============================================================================

#[test]
fn test_same_filter_twice_rescans_once() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    let rescans = count_events(&mut cf, CaptureEvent::RescanStarted);

    cf.filter_packets("udp", false).unwrap();
    cf.filter_packets("udp", false).unwrap();
    assert_eq!(*rescans.borrow(), 1);

    cf.filter_packets("udp", true).unwrap();
    assert_eq!(*rescans.borrow(), 2);
}

#[test]
fn test_bad_filter_keeps_previous_one() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    cf.filter_packets("tcp", false).unwrap();

    let err = cf.filter_packets("tcp and", false).unwrap_err();
    assert!(matches!(err, Error::Filter(_)));
    assert_eq!(cf.display_filter_text(), "tcp");
    assert_eq!(cf.displayed_count(), 2);
}

#[test]
fn test_rescan_prefers_preceding_displayed_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    cf.select_frame(3).unwrap();

    // Frames 2 and 4 are TCP; the selected frame 3 is UDP.
    cf.filter_packets("tcp", false).unwrap();
    assert_eq!(cf.current_frame(), Some(2));
}

#[test]
fn test_rescan_falls_back_to_following_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    cf.select_frame(1).unwrap();

    cf.filter_packets("tcp", false).unwrap();
    assert_eq!(cf.current_frame(), Some(2));

    cf.filter_packets("icmp", false).unwrap();
    assert_eq!(cf.displayed_count(), 0);
    assert_eq!(cf.current_frame(), None);
}

#[test]
fn test_stopped_redissect_resets_unreached_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    cf.select_frame(5).unwrap();
    let stop = cf.stop_flag();
    cf.taps_mut().register(Box::new(StopAfter { seen: 0, after: 2, stop }));

    assert_eq!(cf.redissect_packets().unwrap(), Outcome::Aborted);
    assert!(!cf.stop_flag().is_set());
    for num in 3..=5 {
        let flags = cf.frames().get(num).unwrap().flags;
        assert!(!flags.passed_dfilter, "frame {num} still passes");
        assert!(!flags.visited, "frame {num} still visited");
    }
    assert!(cf.frames().get(2).unwrap().flags.visited);
    assert_eq!(cf.displayed_count(), 2);
    assert_eq!(cf.current_frame(), Some(2));
}

#[test]
fn test_retap_counts_displayed_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let stats = Rc::new(RefCell::new(ProtocolStats::new()));
    let mut cf = CaptureFile::new(Preferences::default());
    cf.taps_mut().register(Box::new(Rc::clone(&stats)));
    cf.open(&path, None).unwrap();
    cf.read(false).unwrap();
    assert_eq!(stats.borrow().frames(), 5);

    cf.filter_packets("udp", false).unwrap();
    assert_eq!(cf.retap_packets().unwrap(), Outcome::Completed);
    let stats = stats.borrow();
    assert_eq!(stats.frames(), 3);
    assert!(stats.get("tcp").is_none());
    assert_eq!(stats.get("udp").unwrap().frames, 3);
}

#[test]
fn test_ref_time_resets_relative_times() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    assert_eq!(cf.frame(4).unwrap().rel_ts, 3_000_000_000);

    cf.set_ref_time(3, true).unwrap();
    assert_eq!(cf.ref_time_count(), 1);
    assert_eq!(cf.frame(3).unwrap().rel_ts, 0);
    assert_eq!(cf.frame(4).unwrap().rel_ts, 1_000_000_000);

    cf.clear_ref_times();
    assert_eq!(cf.frame(4).unwrap().rel_ts, 3_000_000_000);
}

// ============================================================================
// Searching
// ============================================================================

fn three_named_packets() -> Vec<TestPacket> {
    ["alpha", "bravo", "charlie"]
        .iter()
        .enumerate()
        .map(|(i, word)| TestPacket::new(1_000_000 * (i as u64 + 1), udp_packet(5000, 53, word.as_bytes())))
        .collect()
}

#[test]
fn test_search_wraps_around() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "named.pcap", &three_named_packets());
    let mut cf = read_file(&path);
    cf.select_frame(3).unwrap();

    let result = cf
        .find_packet(SearchKind::string("alpha", ByteEncoding::Narrow), SearchDirection::Forward)
        .unwrap();
    assert_eq!(result, SearchResult::Found(1));
    assert_eq!(cf.current_frame(), Some(1));
}

#[test]
fn test_search_without_wrap_reaches_end() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "named.pcap", &three_named_packets());
    let mut cf = read_file(&path);
    cf.prefs_mut().wrap_search = false;
    cf.select_frame(3).unwrap();

    let result = cf
        .find_packet(SearchKind::string("alpha", ByteEncoding::Narrow), SearchDirection::Forward)
        .unwrap();
    assert_eq!(result, SearchResult::ReachedEnd);
    assert_eq!(cf.current_frame(), Some(3));
}

#[test]
fn test_byte_search_reports_last_matched_byte() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "named.pcap", &three_named_packets());
    let mut cf = read_file(&path);

    // Bytes 10..=12: last two bytes of the source MAC and the first ethertype byte.
    let kind = SearchKind::Bytes {
        needle: vec![0xaa, 0xbb, 0x08],
        encoding: ByteEncoding::Narrow,
    };
    assert_eq!(cf.find_packet(kind, SearchDirection::Forward).unwrap(), SearchResult::Found(1));
    assert_eq!(cf.last_byte_match(), Some(ByteMatch { pos: 12, len: 3 }));
}

#[test]
fn test_find_next_reuses_criterion() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);

    let kind = SearchKind::filter("tcp").unwrap();
    assert_eq!(cf.find_packet(kind, SearchDirection::Forward).unwrap(), SearchResult::Found(2));
    assert_eq!(cf.find_next().unwrap(), SearchResult::Found(4));
    assert_eq!(cf.find_previous().unwrap(), SearchResult::Found(2));
}

#[test]
fn test_search_skips_hidden_frames() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "named.pcap", &three_named_packets());
    let mut cf = read_file(&path);
    cf.filter_packets("not contains \"bravo\"", false).unwrap();

    let result = cf
        .find_packet(SearchKind::string("bravo", ByteEncoding::Narrow), SearchDirection::Forward)
        .unwrap();
    assert_eq!(result, SearchResult::NotFound);
}

// ============================================================================
// Frame bookkeeping
// ============================================================================

#[test]
fn test_comment_counts() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    assert_eq!(cf.packet_comment_count(), 0);

    let change = cf.set_user_comment(2, Some("handshake".into())).unwrap();
    assert_eq!(change, CommentChange::Added);
    assert_eq!(cf.packet_comment_count(), 1);
    assert!(cf.unsaved_changes());

    let change = cf.set_user_comment(2, Some("handshake".into())).unwrap();
    assert_eq!(change, CommentChange::Unchanged);
    assert_eq!(cf.packet_comment_count(), 1);

    let change = cf.set_user_comment(2, None).unwrap();
    assert_eq!(change, CommentChange::Removed);
    assert_eq!(cf.packet_comment_count(), 0);
}

#[test]
fn test_goto_hidden_frame_fails() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);
    cf.filter_packets("udp", false).unwrap();

    assert!(matches!(cf.goto_frame(2), Err(Error::FrameNotDisplayed(2))));
    assert!(matches!(cf.goto_frame(9), Err(Error::NoSuchFrame(9))));
    cf.goto_frame(3).unwrap();
    assert_eq!(cf.current_frame(), Some(3));
}

#[test]
fn test_marks_dirty_the_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    // A non-zero time zone field is kept by a byte copy and zeroed by the
    // writer.
    let mut original = fs::read(&path).unwrap();
    original[8..12].copy_from_slice(&3600i32.to_le_bytes());
    fs::write(&path, &original).unwrap();
    let dest = dir.path().join("marked.pcap");
    let mut cf = read_file(&path);

    cf.set_marked(1, true).unwrap();
    assert!(cf.unsaved_changes());
    cf.set_marked(4, true).unwrap();
    assert_eq!(cf.marked_count(), 2);

    let kind = SearchKind::Marked;
    assert_eq!(cf.find_packet(kind, SearchDirection::Backward).unwrap(), SearchResult::Found(4));

    cf.save_records(&dest, &SaveOptions::new(FileFormat::Pcap)).unwrap();
    let saved = fs::read(&dest).unwrap();
    assert_ne!(saved, original);
    assert_eq!(&saved[8..12], &0i32.to_le_bytes());
    assert!(!cf.unsaved_changes());
    assert_eq!(cf.path(), Some(dest.as_path()));
    assert_eq!(read_file(&dest).count(), 5);
}

// ============================================================================
// Saving, exporting and merging
// ============================================================================

#[test]
fn test_unchanged_save_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let dest = dir.path().join("copy.pcap");
    let mut cf = read_file(&path);

    let outcome = cf.save_records(&dest, &SaveOptions::new(FileFormat::Pcap)).unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(fs::read(&dest).unwrap(), fs::read(&path).unwrap());
    assert!(!cf.unsaved_changes());
    assert_eq!(cf.path(), Some(dest.as_path()));
    assert_eq!(cf.count(), 5);
}

#[test]
fn test_unchanged_temp_file_is_moved() {
    let dir = tempfile::tempdir().unwrap();
    let temp = pcap_in(dir.path(), "capture-tmp.pcap", &mixed_packets());
    let original = fs::read(&temp).unwrap();
    let dest = dir.path().join("kept.pcap");
    let mut cf = CaptureFile::new(Preferences::default());
    cf.open_temp(&temp, "eth0").unwrap();
    cf.read(false).unwrap();
    assert!(cf.is_tempfile());

    let options = SaveOptions::new(FileFormat::Pcap).reopen(false);
    assert_eq!(cf.save_records(&dest, &options).unwrap(), Outcome::Completed);
    assert!(!temp.exists());
    assert_eq!(fs::read(&dest).unwrap(), original);
    // The temporary file is gone, so the open file follows it.
    assert!(!cf.is_tempfile());
    assert_eq!(cf.path(), Some(dest.as_path()));
    cf.goto_frame(5).unwrap();
    assert_eq!(cf.count(), 5);
}

#[test]
fn test_reencode_writes_every_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let dest = dir.path().join("all.pcapng");
    let mut cf = read_file(&path);
    cf.filter_packets("udp", false).unwrap();
    assert!(!cf.unsaved_changes());

    cf.save_records(&dest, &SaveOptions::new(FileFormat::PcapNg)).unwrap();
    assert_eq!(cf.format(), Some(FileFormat::PcapNg));
    assert_eq!(cf.count(), 5);
    assert_eq!(cf.displayed_count(), 3);

    let saved = read_file(&dest);
    assert_eq!(saved.count(), 5);
    assert_eq!(saved.format(), Some(FileFormat::PcapNg));
}

#[test]
fn test_saved_comments_survive_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let dest = dir.path().join("commented.pcapng");
    let mut cf = read_file(&path);
    cf.set_user_comment(3, Some("look here".into())).unwrap();

    cf.save_records(&dest, &SaveOptions::new(FileFormat::PcapNg)).unwrap();
    assert!(!cf.unsaved_changes());
    assert_eq!(cf.comment(3).as_deref(), Some("look here"));

    let saved = read_file(&dest);
    assert_eq!(saved.packet_comment_count(), 1);
    assert_eq!(saved.comment(3).as_deref(), Some("look here"));
}

#[test]
fn test_save_over_existing_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let dest = pcap_in(dir.path(), "old.pcap", &three_named_packets());
    let mut cf = read_file(&path);

    cf.save_records(&dest, &SaveOptions::new(FileFormat::PcapNg)).unwrap();
    assert_eq!(read_file(&dest).count(), 5);
    let mut staging = dest.clone().into_os_string();
    staging.push("~");
    assert!(!std::path::Path::new(&staging).exists());
}

#[test]
fn test_export_displayed_only() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let dest = dir.path().join("udp.pcap");
    let mut cf = read_file(&path);
    cf.filter_packets("udp", false).unwrap();

    let outcome = cf
        .export_specified_packets(&dest, &PacketRange::displayed(), FileFormat::Pcap, Compression::None)
        .unwrap();
    assert_eq!(outcome, Outcome::Completed);
    assert_eq!(cf.path(), Some(path.as_path()));
    assert_eq!(read_file(&dest).count(), 3);
}

#[test]
fn test_export_explicit_range() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let dest = dir.path().join("some.pcapng");
    let mut cf = read_file(&path);

    let range: PacketRange = "2-3,5".parse().unwrap();
    cf.export_specified_packets(&dest, &range, FileFormat::PcapNg, Compression::None)
        .unwrap();
    assert_eq!(read_file(&dest).count(), 3);
}

#[test]
fn test_export_onto_open_file_is_refused() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let mut cf = read_file(&path);

    let err = cf
        .export_specified_packets(&path, &PacketRange::all(), FileFormat::Pcap, Compression::None)
        .unwrap_err();
    assert!(matches!(err, Error::Write(_)));
    assert_eq!(read_file(&path).count(), 5);
}

#[test]
fn test_summary_export_csv() {
    let dir = tempfile::tempdir().unwrap();
    let path = pcap_in(dir.path(), "mixed.pcap", &mixed_packets());
    let dest = dir.path().join("summary.csv");
    let mut cf = read_file(&path);
    cf.filter_packets("tcp", false).unwrap();

    cf.export_summary(&dest, &PacketRange::displayed(), "csv".parse().unwrap())
        .unwrap();
    let text = fs::read_to_string(&dest).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with("No.,"));
    assert!(lines[1].starts_with("2,"));
    assert!(lines[1].contains("TCP"));
}

#[test]
fn test_merge_interleaves_by_time() {
    let dir = tempfile::tempdir().unwrap();
    let even: Vec<TestPacket> = (0..3)
        .map(|i| TestPacket::new(2_000_000 * i, udp_packet(1000, 53, b"even")))
        .collect();
    let odd: Vec<TestPacket> = (0..3)
        .map(|i| TestPacket::new(2_000_000 * i + 1_000_000, udp_packet(2000, 53, b"odd")))
        .collect();
    let a = pcap_in(dir.path(), "a.pcap", &even);
    let b = pcap_in(dir.path(), "b.pcap", &odd);
    let out = dir.path().join("merged.pcapng");

    let mut cf = CaptureFile::new(Preferences::default());
    let outcome = cf
        .merge_files(&out, &[a.clone(), b.clone()], FileFormat::PcapNg, MergeMode::Chronological)
        .unwrap();
    assert_eq!(outcome, Outcome::Completed);

    let merged = read_file(&out);
    assert_eq!(merged.count(), 6);
    let times: Vec<i64> = merged.frames().iter().map(|f| f.abs_ts).collect();
    assert!(times.windows(2).all(|w| w[0] <= w[1]));

    let appended_out = dir.path().join("appended.pcapng");
    cf.merge_files(&appended_out, &[a, b], FileFormat::PcapNg, MergeMode::Append)
        .unwrap();
    let appended = read_file(&appended_out);
    let times: Vec<i64> = appended.frames().iter().map(|f| f.abs_ts).collect();
    assert_eq!(times[2], 4_000_000_000);
    assert_eq!(times[3], 1_000_000_000);
}
