//! Command-line host for the satsuma core: assemble, run or check a `.s`
//! file without the windowed debugger.

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};

use emu::controller::Controller;
use emu::cpu::arm::instructions::ArmModeInstruction;
use emu::cpu::arm7tdmi::RunState;
use emu::harness;

#[derive(Parser)]
#[command(version, about = "ARM7TDMI emulator and assembler")]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Write logs to a file under the temp directory instead of stdout.
    #[arg(long, global = true)]
    log_file: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Assemble a `.s` file and print the listing.
    Assemble { file: PathBuf },

    /// Assemble and run a `.s` file to completion, printing its terminal
    /// output.
    Run {
        file: PathBuf,

        /// Stop after this many instructions even without a halt.
        #[arg(long, default_value_t = 1_000_000)]
        max_steps: u32,
    },

    /// Run a `.s` file and check its `;!` expectation comments.
    Check { file: PathBuf },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init_logger(if cli.log_file {
        logger::Sink::TempFile
    } else {
        logger::Sink::Stdout
    });

    match cli.command {
        Command::Assemble { file } => assemble(&file),
        Command::Run { file, max_steps } => run(&file, max_steps),
        Command::Check { file } => check(&file),
    }
}

fn load(controller: &Controller, file: &PathBuf) -> anyhow::Result<()> {
    controller.load_program_path(file).map_err(|diagnostics| {
        anyhow!(
            "{}",
            diagnostics
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join("\n")
        )
    })
}

fn assemble(file: &PathBuf) -> anyhow::Result<()> {
    let controller = Controller::new();
    load(&controller, file)?;

    let mut addr = 0;
    loop {
        let line = controller.line_at(addr);
        if line.value == 0 && line.comment.is_none() {
            break;
        }
        let text = ArmModeInstruction::from(line.value).disassemble(addr);
        match line.comment {
            Some(comment) => println!("{addr:08X}  {:08X}  {text:<32};{comment}", line.value),
            None => println!("{addr:08X}  {:08X}  {text}", line.value),
        }
        addr += 4;
    }
    Ok(())
}

fn run(file: &PathBuf, max_steps: u32) -> anyhow::Result<()> {
    let controller = Controller::new();
    load(&controller, file)?;

    let stdin = io::stdin();
    let mut last_steps = 0;
    loop {
        controller.step_times(10_000);
        let info = controller.processor_info();

        match &info.state {
            Err(fault) => bail!("fault after {} steps: {fault}", info.steps),
            Ok(RunState::Stopped) => break,
            Ok(RunState::Running) => {
                if info.steps >= u64::from(max_steps) {
                    bail!("no halt within {max_steps} steps");
                }
                if info.steps == last_steps {
                    // No progress: the program is waiting for input.
                    print!("{}", info.output);
                    io::stdout().flush().context("flushing terminal output")?;
                    let mut line = String::new();
                    let read = stdin
                        .lock()
                        .read_line(&mut line)
                        .context("reading user input")?;
                    if read == 0 {
                        bail!("program is waiting for input, but stdin is closed");
                    }
                    controller.set_user_input(line);
                }
                last_steps = info.steps;
            }
        }
    }

    let info = controller.processor_info();
    println!("{}", info.output);
    let (flags, micros) =
        controller.with_processor(|p| (p.cpsr().flags_string(), p.estimated_time_micros()));
    println!("halted after {} steps, ~{micros:.2} us simulated, flags [{flags}]", info.steps);
    Ok(())
}

fn check(file: &PathBuf) -> anyhow::Result<()> {
    let src = std::fs::read_to_string(file)
        .with_context(|| format!("cannot read {}", file.display()))?;
    harness::run_source(&src).map_err(|err| anyhow!("{err}"))?;
    println!("ok: {}", file.display());
    Ok(())
}
