//! capfile CLI entry point.

use std::cell::RefCell;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::rc::Rc;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tracing_subscriber::EnvFilter;

use capfile::capture::{
    CaptureFile, Outcome, PacketRange, SaveOptions, SearchDirection, SearchResult, SummaryFormat,
};
use capfile::cli::{
    hexdump, install_interrupt_handler, parse_search, print_file_info, print_packet_detail,
    print_packet_list, print_protocol_stats, Args, IndicatifReporter, Repl, ReplCommand, ReplInput,
};
use capfile::config::Preferences;
use capfile::dissect::ProtocolStats;
use capfile::io::{Compression, FileFormat, MergeMode};

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = match args.verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .init();

    let mut prefs = match &args.prefs {
        Some(path) => Preferences::load(path)
            .with_context(|| format!("Failed to load preferences: {}", path.display()))?,
        None => Preferences::default(),
    };
    if args.case_sensitive {
        prefs.case_sensitive_search = true;
    }
    if args.no_wrap {
        prefs.wrap_search = false;
    }

    let mut cf = CaptureFile::new(prefs);
    if args.progress {
        cf.set_progress_reporter(Box::new(IndicatifReporter::new()));
    }
    if let Err(e) = install_interrupt_handler(cf.stop_flag()) {
        tracing::warn!("Could not install Ctrl-C handler: {}", e);
    }

    if let Some((output, inputs)) = args.merge_paths() {
        let mode = if args.append { MergeMode::Append } else { MergeMode::default() };
        let outcome = cf
            .merge_files(&output, &inputs, args.format, mode)
            .with_context(|| format!("Failed to merge into {}", output.display()))?;
        report_outcome("Merged", &output, outcome);
        return Ok(());
    }

    let stats = Rc::new(RefCell::new(ProtocolStats::new()));
    cf.taps_mut().register(Box::new(Rc::clone(&stats)));

    let file = match args.file.clone() {
        Some(file) => file,
        None if args.interactive => return run_repl(&mut cf, &stats),
        None => bail!("Capture file required. Use --help for usage."),
    };

    // With no file open yet these only store the filters.
    if let Some(text) = &args.display_filter {
        cf.filter_packets(text, false)?;
    }
    if let Some(text) = &args.read_filter {
        cf.set_read_filter(text)?;
    }

    cf.open(&file, None)
        .with_context(|| format!("Failed to open capture file: {}", file.display()))?;
    if cf.read(false)?.is_aborted() {
        eprintln!("Read interrupted after {} packets", cf.count());
    }

    if args.redissect {
        cf.redissect_packets()?;
    }
    if let Some(num) = args.goto {
        cf.goto_frame(num)?;
        print_packet_detail(&mut cf, num, &mut io::stdout().lock())?;
    }
    if let Some(request) = &args.find {
        let kind = parse_search(request, cf.prefs().case_sensitive_search)?;
        let direction = if args.backward { SearchDirection::Backward } else { SearchDirection::Forward };
        let result = cf.find_packet(kind, direction)?;
        print_search_result(&mut cf, result)?;
    }
    if let Some(out) = &args.write {
        let options = SaveOptions::new(args.format)
            .compression(args.compress.unwrap_or(Compression::None))
            .discard_comments(args.discard_comments);
        let outcome = cf
            .save_records(out, &options)
            .with_context(|| format!("Failed to save {}", out.display()))?;
        report_outcome("Saved", out, outcome);
    }
    if let Some(out) = &args.export {
        let range: PacketRange = args.range.parse()?;
        let outcome = cf
            .export_specified_packets(out, &range, args.format, args.compress.unwrap_or(Compression::None))
            .with_context(|| format!("Failed to export {}", out.display()))?;
        report_outcome("Exported", out, outcome);
    }
    if let Some(out) = &args.summary {
        let range: PacketRange = args.range.parse()?;
        let outcome = cf.export_summary(out, &range, args.summary_format)?;
        report_outcome("Wrote summary", out, outcome);
    }

    if args.interactive {
        return run_repl(&mut cf, &stats);
    }
    if !args.has_action() {
        print_packet_list(&mut cf, &mut io::stdout().lock(), None)?;
    }
    cf.close();
    Ok(())
}

fn report_outcome(verb: &str, path: &Path, outcome: Outcome) {
    match outcome {
        Outcome::Completed => eprintln!("{verb} {}", path.display()),
        Outcome::Aborted => eprintln!("Stopped; {} is incomplete or unchanged", path.display()),
    }
}

fn print_search_result(cf: &mut CaptureFile, result: SearchResult) -> Result<()> {
    match result {
        SearchResult::Found(num) => {
            println!("Found packet {num}");
            if let Some(m) = cf.last_byte_match() {
                println!("Match ends at byte {} ({} bytes)", m.pos, m.len);
            }
            print_packet_detail(cf, num, &mut io::stdout().lock())?;
        }
        SearchResult::NotFound => println!("No packet matched"),
        SearchResult::ReachedEnd => println!("No match before the end of the capture"),
        SearchResult::ReachedBeginning => println!("No match before the beginning of the capture"),
        SearchResult::Aborted => println!("Search stopped"),
    }
    Ok(())
}

fn run_repl(cf: &mut CaptureFile, stats: &Rc<RefCell<ProtocolStats>>) -> Result<()> {
    let history_path = dirs::data_local_dir()
        .map(|d| d.join("capfile").join("history.txt"))
        .unwrap_or_else(|| PathBuf::from(".capfile_history"));

    if let Some(parent) = history_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    let mut repl = Repl::new()?.with_history(history_path.to_str().unwrap_or(".capfile_history"));

    println!("capfile - capture file browser");
    if cf.path().is_some() {
        println!("Loaded: {} ({} packets)", cf.display_name(), cf.count());
    }
    println!("Type .help for help, .quit to exit");
    println!();

    loop {
        let cmd = match repl.read_input()? {
            ReplInput::Exit => break,
            ReplInput::Command(cmd) => cmd,
        };
        if cmd.is_quit() {
            break;
        }
        // Ctrl-C during a command stops that command only.
        cf.stop_flag().clear();
        if let Err(e) = run_command(cf, stats, cmd) {
            eprintln!("Error: {e:#}");
        }
    }
    cf.close();
    println!("Goodbye!");
    Ok(())
}

fn run_command(cf: &mut CaptureFile, stats: &Rc<RefCell<ProtocolStats>>, cmd: ReplCommand) -> Result<()> {
    let mut stdout = io::stdout().lock();
    match cmd {
        ReplCommand::Empty | ReplCommand::Quit => {}
        ReplCommand::Help => print_help(),
        ReplCommand::Unknown(s) => {
            eprintln!("Unknown command: {s}");
            eprintln!("Type .help for available commands");
        }
        ReplCommand::Open(path) => {
            cf.open(&path, None)
                .with_context(|| format!("Failed to open capture file: {path}"))?;
            if cf.read(false)?.is_aborted() {
                println!("Read interrupted");
            }
            println!("Loaded {} packets", cf.count());
        }
        ReplCommand::Close => cf.close(),
        ReplCommand::Reload => {
            cf.reload()?;
            println!("Loaded {} packets", cf.count());
        }
        ReplCommand::Info => print_file_info(cf, &mut stdout)?,
        ReplCommand::List(limit) => {
            print_packet_list(cf, &mut stdout, limit)?;
        }
        ReplCommand::Filter(text) => {
            cf.filter_packets(&text, false)?;
            println!("{} of {} packets displayed", cf.displayed_count(), cf.count());
        }
        ReplCommand::ReadFilter(text) => {
            cf.set_read_filter(&text)?;
            println!("Read filter applies from the next .reload");
        }
        ReplCommand::Goto(num) => {
            cf.goto_frame(num)?;
            print_packet_detail(cf, num, &mut stdout)?;
        }
        ReplCommand::Show(num) => print_packet_detail(cf, num, &mut stdout)?,
        ReplCommand::Hexdump(num) => {
            let data = cf.frame_bytes(num)?;
            write!(stdout, "{}", hexdump(&data))?;
        }
        ReplCommand::Find(request) => {
            let kind = parse_search(&request, cf.prefs().case_sensitive_search)?;
            drop(stdout);
            let result = cf.find_packet(kind, SearchDirection::Forward)?;
            print_search_result(cf, result)?;
        }
        ReplCommand::Next => {
            drop(stdout);
            let result = cf.find_next()?;
            print_search_result(cf, result)?;
        }
        ReplCommand::Previous => {
            drop(stdout);
            let result = cf.find_previous()?;
            print_search_result(cf, result)?;
        }
        ReplCommand::Mark(num, marked) => cf.set_marked(num, marked)?,
        ReplCommand::Ignore(num, ignored) => {
            cf.set_ignored(num, ignored)?;
            cf.redissect_packets()?;
        }
        ReplCommand::TimeRef(num, on) => cf.set_ref_time(num, on)?,
        ReplCommand::Comment(num, text) => {
            let change = cf.set_user_comment(num, text)?;
            tracing::debug!(num, ?change, "comment edited");
        }
        ReplCommand::Redissect => {
            cf.redissect_packets()?;
        }
        ReplCommand::Stats => {
            if cf.retap_packets()?.is_aborted() {
                println!("Statistics are partial");
            }
            print_protocol_stats(&stats.borrow(), &mut stdout)?;
        }
        ReplCommand::Save(path, format) => {
            let format = format_or_current(cf, format.as_deref())?;
            let outcome = cf.save_records(&path, &SaveOptions::new(format))?;
            report_outcome("Saved", Path::new(&path), outcome);
        }
        ReplCommand::Export(path, range, format) => {
            let range: PacketRange = range.parse()?;
            let format = format_or_current(cf, format.as_deref())?;
            let outcome = cf.export_specified_packets(&path, &range, format, Compression::None)?;
            report_outcome("Exported", Path::new(&path), outcome);
        }
        ReplCommand::Summary(path, format) => {
            let format: SummaryFormat = match format {
                Some(name) => name.parse().map_err(anyhow::Error::msg)?,
                None => SummaryFormat::default(),
            };
            let outcome = cf.export_summary(&path, &PacketRange::displayed(), format)?;
            report_outcome("Wrote summary", Path::new(&path), outcome);
        }
    }
    Ok(())
}

fn format_or_current(cf: &CaptureFile, name: Option<&str>) -> Result<FileFormat> {
    match name {
        Some(name) => FileFormat::from_name(name).with_context(|| format!("Unknown capture format: {name}")),
        None => Ok(cf.format().unwrap_or(FileFormat::PcapNg)),
    }
}

fn print_help() {
    println!(
        r#"
Commands:
  .open FILE              Open and read a capture file
  .close                  Close the current file
  .reload                 Read the current file again
  .info                   File information and counts
  .list [N]               List displayed packets
  .filter [TEXT]          Set the display filter (empty clears it)
  .rfilter TEXT           Set the read filter for the next reload
  .goto N                 Select a packet and show it
  .show N                 Show the protocol tree and bytes of a packet
  .hexdump N              Hex dump of a packet
  .find KIND:VALUE        Search (string, wide, any, summary, tree,
                          tree-regex, hex, regex, filter, marked, reftime)
  .next / .prev           Repeat the last search
  .mark N / .unmark N     Mark or unmark a packet
  .ignore N / .unignore N Ignore or unignore a packet
  .ref N / .unref N       Set or clear a time reference
  .comment N [TEXT]       Set or remove a packet comment
  .redissect              Dissect every packet again
  .stats                  Protocol statistics
  .save FILE [FORMAT]     Save all packets (pcap, pcap-ns, pcapng)
  .export FILE RANGE [FORMAT]
                          Export a range: all, displayed, marked,
                          marked-range or "1-5,9,12-"
  .summary FILE [FORMAT]  Write summary lines (text, csv, json)
  .quit                   Exit

Any other input is applied as a display filter, e.g.:
  tcp port 80 and not host 10.0.0.1
"#
    );
}
