use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use dgds_formats::{
    AdsScript, GameVariant, OpcodeTable, Operands, ScriptBundle, ScriptCursor, TtmScript,
    ads_ops, ttm_ops,
};

/// Disassemble the ADS and TTM scripts held in a script bundle.
#[derive(Parser)]
struct Args {
    /// Path to the JSON script bundle
    path: PathBuf,

    /// Game dialect the scripts were written for
    #[arg(long, value_enum, default_value_t = GameVariant::Dragon)]
    variant: GameVariant,

    /// Only dump the script with this name
    #[arg(long)]
    only: Option<String>,
}

fn main() -> Result<()> {
    env_logger::init();
    let args = Args::parse();
    let bundle = ScriptBundle::from_json_file(&args.path)?;
    let wanted = |name: &str| {
        args.only
            .as_deref()
            .is_none_or(|only| only.eq_ignore_ascii_case(name))
    };

    for (name, resource) in bundle.ads.iter().filter(|(name, _)| wanted(name)) {
        let script = AdsScript::parse(resource.bytes(), OpcodeTable::ads(args.variant))
            .with_context(|| format!("scanning {name}"))?;
        println!("ADS {name}: {} segments", script.segments().len());
        for reference in &resource.scripts {
            println!("  env {:>3} <= {}", reference.id, reference.name);
        }
        dump_ads(&script)?;
    }

    for (name, resource) in bundle.ttm.iter().filter(|(name, _)| wanted(name)) {
        let script = TtmScript::parse(resource.bytes(), resource.frames, OpcodeTable::ttm(args.variant))
            .with_context(|| format!("scanning {name}"))?;
        println!("TTM {name}: {} frames", script.total_frames());
        dump_ttm(&script)?;
    }

    Ok(())
}

fn dump_ads(script: &AdsScript) -> Result<()> {
    let table = script.table();
    let mut cursor = script.cursor();
    for segment in script.segments() {
        cursor.seek(segment.offset + 2)?;
        println!("  segment {} @ 0x{:04x}", segment.number, segment.offset);
        let mut depth = 0usize;
        while cursor.remaining() {
            let offset = cursor.position();
            let opcode = cursor.read_opcode()?;
            let operands = table.read_operands(&mut cursor, opcode)?;
            if matches!(opcode, ads_ops::END_IF | ads_ops::END_WHILE | ads_ops::ELSE) {
                depth = depth.saturating_sub(1);
            }
            print_line(offset, depth, opcode, table.name(opcode), &operands);
            if opcode == ads_ops::END_SEGMENT {
                break;
            }
            if (ads_ops::is_condition(opcode) && !next_is_connective(&mut cursor)) || opcode == ads_ops::ELSE {
                depth += 1;
            }
        }
    }
    Ok(())
}

fn next_is_connective(cursor: &mut ScriptCursor) -> bool {
    matches!(cursor.peek_u16(), Some(ads_ops::AND | ads_ops::OR))
}

fn dump_ttm(script: &TtmScript) -> Result<()> {
    let table = script.table();
    let mut cursor = script.cursor();
    for frame in 0..script.total_frames() {
        let Some(offset) = script.frame_offset(frame as i16) else {
            println!("  frame {frame}: <missing>");
            continue;
        };
        cursor.seek(offset)?;
        println!("  frame {frame} @ 0x{offset:04x}");
        while cursor.remaining() {
            let offset = cursor.position();
            let opcode = cursor.read_opcode()?;
            let operands = table.read_operands(&mut cursor, opcode)?;
            print_line(offset, 1, opcode, table.name(opcode), &operands);
            if opcode & 0xFFF0 == ttm_ops::FRAME_END {
                break;
            }
        }
    }
    Ok(())
}

fn print_line(offset: usize, depth: usize, opcode: u16, name: &str, operands: &Operands) {
    let rendered = match operands {
        Operands::Words(words) => words
            .iter()
            .map(|word| word.to_string())
            .collect::<Vec<_>>()
            .join(", "),
        Operands::Text(text) => format!("{:?}", String::from_utf8_lossy(text)),
        Operands::Points(points) => points
            .iter()
            .map(|point| format!("({}, {})", point.x, point.y))
            .collect::<Vec<_>>()
            .join(" "),
    };
    println!(
        "    {offset:04x}: {indent}{opcode:04x} {name} {rendered}",
        indent = "  ".repeat(depth)
    );
}
