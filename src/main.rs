//! Duck Machine Emulator - CLI Entry Point
//!
//! Commands:
//! - `duck-emu run <program>` - Run an OBJ or ASM file
//! - `duck-emu debug <program>` - Interactive debugger
//! - `duck-emu asm <source>` - Assemble to OBJ
//! - `duck-emu disasm <obj>` - Disassemble OBJ
//! - `duck-emu test` - Built-in self-test

use clap::{Parser, Subcommand};
use duckmachine::{assemble, disassemble_word, load_obj, Cpu, CpuStep, Memory, StepListener, Word};

#[derive(Parser)]
#[command(name = "duck-emu")]
#[command(version = "0.1.0")]
#[command(about = "An instruction-set simulator for the Duck Machine teaching CPU")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a program until it halts
    Run {
        /// Path to the OBJ or ASM file to execute
        program: String,
        /// Maximum number of steps to run (default: 10000)
        #[arg(short, long, default_value = "10000")]
        max_steps: u64,
        /// Show a trace of every step
        #[arg(short, long)]
        trace: bool,
        /// Write a JSON snapshot of the final machine state to this file
        #[arg(long)]
        dump_state: Option<String>,
    },
    /// Interactive debugger
    Debug {
        /// Path to the OBJ or ASM file to debug
        program: String,
    },
    /// Assemble source to OBJ
    Asm {
        /// Path to the source file
        source: String,
        /// Output OBJ file
        #[arg(short, long)]
        output: Option<String>,
    },
    /// Disassemble OBJ to readable text
    Disasm {
        /// Path to the OBJ file
        obj: String,
    },
    /// Run the built-in self-test
    Test,
}

fn main() {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run { program, max_steps, trace, dump_state }) => {
            run_program(&program, max_steps, trace, dump_state.as_deref());
        }
        Some(Commands::Debug { program }) => {
            debug_program(&program);
        }
        Some(Commands::Asm { source, output }) => {
            assemble_file(&source, output);
        }
        Some(Commands::Disasm { obj }) => {
            disassemble_file(&obj);
        }
        Some(Commands::Test) => {
            run_self_test();
        }
        None => {
            println!("Duck Machine Emulator v0.1.0");
            println!("A 16-register teaching CPU simulator");
            println!();
            println!("Use --help for available commands");
            println!();
            demo_duck_machine();
        }
    }
}

/// Step listener that prints one trace line per instruction.
struct PrintTrace;

impl StepListener for PrintTrace {
    fn on_step(&mut self, event: &CpuStep) {
        println!(
            "{:03}: {:<24} cond={:?}",
            event.pc_addr,
            disassemble_word(event.instr_word),
            event.condition
        );
    }
}

/// Load a program image (either OBJ or ASM).
fn load_program_file(path: &str) -> Vec<Word> {
    if path.ends_with(".asm") {
        let source = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => {
                eprintln!("❌ Failed to read file: {}", e);
                std::process::exit(1);
            }
        };

        match assemble(&source) {
            Ok(words) => {
                println!("📝 Assembled {} words", words.len());
                words
            }
            Err(e) => {
                eprintln!("❌ Assembly error: {}", e);
                std::process::exit(1);
            }
        }
    } else {
        match load_obj(path) {
            Ok(obj) => {
                println!("📂 Loaded {} words", obj.len());
                obj.words
            }
            Err(e) => {
                eprintln!("❌ Failed to load OBJ: {}", e);
                std::process::exit(1);
            }
        }
    }
}

fn boot_cpu(words: &[Word]) -> Cpu {
    let mut mem = Memory::new();
    if let Err(e) = mem.load_program(0, words) {
        eprintln!("❌ Failed to load program: {}", e);
        std::process::exit(1);
    }
    Cpu::new(mem)
}

fn run_program(path: &str, max_steps: u64, trace: bool, dump_state: Option<&str>) {
    println!("🔧 Running: {}", path);

    let words = load_program_file(path);
    if words.is_empty() {
        eprintln!("❌ No words to execute");
        std::process::exit(1);
    }

    let mut cpu = boot_cpu(&words);
    if trace {
        cpu.add_listener(Box::new(PrintTrace));
    }

    println!();
    println!("━━━ Execution ━━━");
    let executed = cpu.run_limited(0, max_steps);

    println!();
    println!("━━━ Result ━━━");
    println!("Steps:     {}", executed);
    println!("Halted:    {}", cpu.halted);
    println!("Condition: {:?}", cpu.condition);
    for (index, value) in cpu.regs.snapshot().iter().enumerate() {
        if *value != 0 || index == 15 {
            println!("r{:<2} = {}", index, value);
        }
    }

    if !cpu.halted {
        println!();
        println!("⚠️  Reached max steps limit ({}). Use --max-steps to increase.", max_steps);
    }

    if let Some(path) = dump_state {
        match serde_json::to_string_pretty(&cpu.snapshot()) {
            Ok(json) => {
                if let Err(e) = std::fs::write(path, json) {
                    eprintln!("❌ Failed to write state dump: {}", e);
                    std::process::exit(1);
                }
                println!("💾 State written to {}", path);
            }
            Err(e) => {
                eprintln!("❌ Failed to serialize state: {}", e);
                std::process::exit(1);
            }
        }
    }
}

#[cfg(feature = "tui")]
fn debug_program(path: &str) {
    use duckmachine::run_debugger;

    println!("🔍 Loading: {}", path);

    let words = load_program_file(path);
    if words.is_empty() {
        eprintln!("❌ No words to execute");
        std::process::exit(1);
    }

    println!("🚀 Launching debugger...");
    println!();

    if let Err(e) = run_debugger(words) {
        eprintln!("❌ Debugger error: {}", e);
        std::process::exit(1);
    }
}

#[cfg(not(feature = "tui"))]
fn debug_program(_path: &str) {
    eprintln!("❌ This build has no debugger; rebuild with the 'tui' feature");
    std::process::exit(1);
}

fn assemble_file(source_path: &str, output: Option<String>) {
    use duckmachine::asm::objfile::save_words;

    let out_path = output.unwrap_or_else(|| source_path.replace(".asm", ".obj"));

    println!("📝 Assembling: {} → {}", source_path, out_path);

    let source = match std::fs::read_to_string(source_path) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("❌ Failed to read file: {}", e);
            std::process::exit(1);
        }
    };

    let words = match assemble(&source) {
        Ok(words) => words,
        Err(e) => {
            eprintln!("❌ Assembly error: {}", e);
            std::process::exit(1);
        }
    };

    println!("✓ Assembled {} words", words.len());

    if let Err(e) = save_words(&out_path, &words) {
        eprintln!("❌ Failed to save OBJ: {}", e);
        std::process::exit(1);
    }

    println!("✓ Saved to {}", out_path);
}

fn disassemble_file(obj_path: &str) {
    use duckmachine::disassemble;

    println!("📖 Disassembling: {}", obj_path);
    println!();

    let obj = match load_obj(obj_path) {
        Ok(o) => o,
        Err(e) => {
            eprintln!("❌ Failed to load OBJ: {}", e);
            std::process::exit(1);
        }
    };

    println!("{}", disassemble(&obj.words));
}

fn demo_duck_machine() {
    println!("━━━ Demo: sum 1..=5 ━━━");
    println!();

    let source = r#"
        ADD r2,r0,r0[5]     ; counter
    loop:
        ADD r1,r1,r2        ; accumulate
        SUB r2,r2,r0[1]     ; count down, sets the condition
        JUMP/P loop         ; repeat while positive
        HALT
    "#;

    let words = assemble(source).expect("demo program must assemble");
    let mut cpu = boot_cpu(&words);
    cpu.add_listener(Box::new(PrintTrace));

    let executed = cpu.run(0);

    println!();
    println!("r1 = {} after {} steps", cpu.regs.get(1), executed);
}

fn run_self_test() {
    use duckmachine::cpu::decode::{decode, encode};
    use duckmachine::{Alu, CondFlag, CondMask, Instruction, Opcode, RegisterFile};

    println!("━━━ Duck Machine Self-Test ━━━");
    println!();

    let mut passed = 0;
    let mut failed = 0;

    // Test 1: Zero register absorbs writes
    print!("Zero register... ");
    let mut regs = RegisterFile::new();
    regs.put(0, 42);
    if regs.get(0) == 0 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 2: ALU floor division and fault path
    print!("ALU division... ");
    let alu = Alu;
    if alu.execute(Opcode::Div, -7, 2) == (-4, CondFlag::Minus)
        && alu.execute(Opcode::Div, 1, 0) == (0, CondFlag::Fault)
    {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 3: Instruction encode/decode roundtrip
    print!("Instruction roundtrip... ");
    let instr = Instruction {
        op: Opcode::Load,
        cond: CondMask::ZERO | CondMask::PLUS,
        target: 9,
        src1: 1,
        src2: 15,
        offset: -100,
    };
    if decode(encode(&instr)) == instr {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 4: CPU halt
    print!("CPU halt instruction... ");
    let mut cpu = boot_cpu(&assemble("HALT").unwrap());
    cpu.run(0);
    if cpu.is_halted() {
        println!("✓");
        passed += 1;
    } else {
        println!("✗");
        failed += 1;
    }

    // Test 5: CPU arithmetic
    print!("CPU add program... ");
    let mut cpu = boot_cpu(&assemble("ADD r1,r0,r0[5]\nHALT").unwrap());
    cpu.run(0);
    if cpu.regs.get(1) == 5 && cpu.regs.pc() == 2 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got r1={}, pc={})", cpu.regs.get(1), cpu.regs.pc());
        failed += 1;
    }

    // Test 6: Store then load
    print!("CPU store/load... ");
    let program = r#"
        ADD r2,r0,r0[42]
        STORE r2,r0,r0[20]
        LOAD r3,r0,r0[20]
        HALT
    "#;
    let mut cpu = boot_cpu(&assemble(program).unwrap());
    cpu.run(0);
    if cpu.regs.get(3) == 42 {
        println!("✓");
        passed += 1;
    } else {
        println!("✗ (got {}, expected 42)", cpu.regs.get(3));
        failed += 1;
    }

    println!();
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    println!("Results: {} passed, {} failed", passed, failed);

    if failed == 0 {
        println!("✓ All tests passed!");
    } else {
        std::process::exit(1);
    }
}
