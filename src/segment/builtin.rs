//! Built-in tool wrappers: read trimming, de novo assembly and contig
//! merging.

use std::sync::Arc;

use super::command::{CommandSegment, CommandSpec};
use super::descriptor::{ArgumentRule, SegmentDescriptor};
use super::summary::SummarySegment;
use super::Segment;
use crate::config::TflowConfig;
use crate::options::OptionValue;

pub fn trimmomatic(config: &TflowConfig) -> CommandSegment {
    let jar = config.executable("Trimmomatic", "trimmomatic-0.32.jar");
    let descriptor = SegmentDescriptor::new("Trimmomatic")
        .with_milestones([
            "Production Trimmer Started",
            "Writing Trimmed",
            "Trimmomatic Job Done",
        ])
        .with_required([
            "command_list",
            "is_paired_reads",
            "working_directory",
            "input_files",
            "output_files",
        ])
        .with_default("command_list", OptionValue::list(["java", "-jar", jar.as_str()]))
        .with_default("is_paired_reads", true)
        .with_default("trim_mode", "PE")
        .with_default("max_CPU", "4")
        .with_default("working_directory", "Trimmomatic")
        .with_default(
            "trim_steps",
            OptionValue::list([
                "ILLUMINACLIP:TruSeq3-PE-2.fa:1:30:10",
                "LEADING:30",
                "TRAILING:30",
                "SLIDINGWINDOW:25:30",
                "MINLEN:75",
            ]),
        )
        .with_default("write_report", true)
        .with_default("write_command", true)
        .with_default("write_pid", true);

    let spec = CommandSpec {
        arguments: vec![
            ArgumentRule::new("", "trim_mode"),
            ArgumentRule::new("-threads", "max_CPU"),
        ],
        positional: vec![
            "input_files".into(),
            "output_files".into(),
            "trim_steps".into(),
        ],
        completion_message: Some("Trimmomatic Job Done".into()),
        result_artifact: None,
        test_args: vec!["-version".into()],
        program_url: Some("http://www.usadellab.org/cms/?page=trimmomatic".into()),
    };
    CommandSegment::new(descriptor, spec)
}

pub fn trinity(config: &TflowConfig) -> CommandSegment {
    let exec = config.executable("Trinity", "Trinity");
    let descriptor = SegmentDescriptor::new("Trinity")
        .with_milestones([
            "Jellyfish",
            "Inchworm",
            "TIMING KMER_DB_BUILDING",
            "TIMING PRUNING",
            "TIMING CONTIG_BUILDING",
            "Chrysalis",
            "Chrysalis: GraphFromFasta",
            "Counting k-mers...",
            "done, assigning k-mers...",
            "Phase 1: Collecting candidate weldmers",
            "...done Phase 1",
            "Phase 2: Reclustering iworm contigs",
            "done bubbling",
            "Chrysalis: ReadsToTranscripts",
            "Chrysalis initial stage completed",
            "Chrysalis: QuantifyGraph",
            "Butterfly",
            "All commands completed",
            "Butterfly assemblies are written",
        ])
        .with_terminal_flags(["Trinity Job Complete"])
        .with_failure_flags(["Exiting Early...", "Traceback", "Not Found"])
        .with_required([
            "command_list",
            "is_paired_reads",
            "read_type",
            "max_memory",
            "write_report",
            "write_command",
        ])
        .with_default("command_list", OptionValue::list([exec.as_str()]))
        .with_default("is_paired_reads", true)
        .with_default("read_type", "fq")
        .with_default("max_memory", "10G")
        .with_default("max_CPU", "4")
        .with_default("output_dir", "Trinity_Assembly")
        .with_default("min_contig_length", "200")
        .with_default("write_report", true)
        .with_default("write_command", true)
        .with_default("write_pid", true);

    let spec = CommandSpec {
        arguments: vec![
            ArgumentRule::new("--seqType", "read_type"),
            ArgumentRule::new("--max_memory", "max_memory"),
            ArgumentRule::new("--CPU", "max_CPU"),
            ArgumentRule::new("--output", "output_dir"),
            ArgumentRule::new("--min_contig_length", "min_contig_length"),
            ArgumentRule::new("--left", "left_reads"),
            ArgumentRule::new("--right", "right_reads"),
            ArgumentRule::new("--single", "single_reads"),
        ],
        positional: Vec::new(),
        completion_message: Some("Trinity Job Complete".into()),
        result_artifact: Some("{output_dir}/Trinity.fasta".into()),
        test_args: vec!["-help".into()],
        program_url: Some("http://trinityrnaseq.github.io/".into()),
    };
    CommandSegment::new(descriptor, spec)
}

pub fn cap3(config: &TflowConfig) -> CommandSegment {
    let exec = config.executable("CAP3", "cap3");
    let descriptor = SegmentDescriptor::new("CAP3")
        .with_milestones(["CAP3 Job Done"])
        .with_required([
            "command_list",
            "working_directory",
            "input_file",
            "write_report",
            "write_command",
            "write_pid",
            "write_result_name",
        ])
        .with_default("command_list", OptionValue::list([exec.as_str()]))
        .with_default("working_directory", "CAP3")
        .with_default("write_report", true)
        .with_default("write_command", true)
        .with_default("write_result_name", false)
        .with_default("write_pid", true);

    let spec = CommandSpec {
        arguments: Vec::new(),
        positional: vec!["input_file".into()],
        completion_message: Some("CAP3 Job Done".into()),
        result_artifact: Some("{input_file}.cap.contigs".into()),
        test_args: Vec::new(),
        program_url: Some("http://seq.cs.iastate.edu/cap3.html".into()),
    };
    CommandSegment::new(descriptor, spec)
}

/// Every segment that ships with tflow.
pub fn builtin_segments(config: &TflowConfig) -> Vec<Arc<dyn Segment>> {
    vec![
        Arc::new(trimmomatic(config)),
        Arc::new(trinity(config)),
        Arc::new(cap3(config)),
        Arc::new(SummarySegment::new()),
    ]
}
