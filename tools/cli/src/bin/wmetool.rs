use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use walkdir::WalkDir;
use wintermute_assets::{Package, PackageWriter};
use wintermute_core::persist::read_save_header;
use wintermute_core::script::opcode::{self, Instr};
use wintermute_core::{compile, ScriptImage};

#[derive(Parser)]
#[command(author, version, about = "Wintermute packaging and script tooling")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Compile a script source file into a bytecode image.
    Compile {
        script: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the tables and instruction listing of a script.
    Disasm { script: PathBuf },
    /// Build a package archive from a directory tree.
    Pack {
        dir: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
        #[arg(long, default_value_t = 0)]
        priority: u8,
        #[arg(long, default_value = "")]
        description: String,
        /// Deflate entries that shrink.
        #[arg(long, default_value_t = true)]
        compress: bool,
    },
    /// Extract every entry of a package archive.
    Unpack {
        package: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// List a package archive's header and directory.
    List { package: PathBuf },
    /// Check a save file's header and report its identity fields.
    VerifySave { save: PathBuf },
    /// Build an asset manifest with sha256 hashes.
    Manifest {
        dir: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct AssetManifest {
    manifest_version: u16,
    assets: BTreeMap<String, AssetEntry>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
struct AssetEntry {
    sha256: String,
    size: u64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Compile { script, output } => compile_script(&script, &output),
        Command::Disasm { script } => disasm(&script),
        Command::Pack {
            dir,
            output,
            priority,
            description,
            compress,
        } => pack(&dir, &output, priority, &description, compress),
        Command::Unpack { package, output } => unpack(&package, &output),
        Command::List { package } => list(&package),
        Command::VerifySave { save } => verify_save(&save),
        Command::Manifest { dir, output } => build_manifest(&dir, &output),
    }
}

fn compile_script(script: &Path, output: &Path) -> Result<()> {
    let source =
        fs::read_to_string(script).with_context(|| format!("read {}", script.display()))?;
    let image = compile(&script.to_string_lossy(), &source).context("compile script")?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, image.to_binary()).with_context(|| format!("write {}", output.display()))?;
    println!(
        "{}: {} bytes of code, {} functions, {} events",
        output.display(),
        image.code.len(),
        image.functions.len(),
        image.events.len()
    );
    Ok(())
}

fn load_image(script: &Path) -> Result<ScriptImage> {
    let bytes = fs::read(script).with_context(|| format!("read {}", script.display()))?;
    let path = script.to_string_lossy();
    match ScriptImage::from_binary(&path, &bytes) {
        Ok(image) => Ok(image),
        Err(_) => {
            let source = String::from_utf8(bytes).context("script is neither image nor UTF-8")?;
            compile(&path, &source).context("compile script")
        }
    }
}

fn disasm(script: &Path) -> Result<()> {
    let image = load_image(script)?;
    println!("; {}", image.source_path);
    for function in &image.functions {
        println!(
            "; function {} ({} params) @ {:#06x}",
            function.name, function.param_count, function.entry
        );
    }
    for method in &image.methods {
        println!(
            "; method {} ({} params) @ {:#06x}",
            method.name, method.param_count, method.entry
        );
    }
    for event in &image.events {
        println!("; on \"{}\" @ {:#06x}", event.name, event.entry);
    }
    for external in &image.externals {
        println!(
            "; external \"{}\" {} ({} params)",
            external.library, external.name, external.param_count
        );
    }

    let mut offset = 0u32;
    while (offset as usize) < image.code.len() {
        let (instr, next) = match opcode::decode(&image.code, offset) {
            Ok(decoded) => decoded,
            Err(err) => bail!("bad instruction at offset {}", err.offset),
        };
        let line = image.line_for_offset(offset);
        let annotated = annotate(&image, &instr);
        println!("{offset:#06x}  [{line:>4}]  {annotated}");
        offset = next;
    }
    Ok(())
}

fn annotate(image: &ScriptImage, instr: &Instr) -> String {
    match instr {
        Instr::PushString(symbol) => format!("PushString {:?}", image.symbol_text(*symbol)),
        Instr::Call { name, argc } => {
            format!("Call {}/{argc}", image.symbol_text(*name))
        }
        Instr::CallMethod { name, argc } => {
            format!("CallMethod {}/{argc}", image.symbol_text(*name))
        }
        Instr::GetProperty(symbol) => format!("GetProperty {}", image.symbol_text(*symbol)),
        Instr::SetProperty(symbol) => format!("SetProperty {}", image.symbol_text(*symbol)),
        Instr::NewObject { class, argc } => {
            format!("NewObject {}/{argc}", image.symbol_text(*class))
        }
        other => format!("{other:?}"),
    }
}

fn pack(dir: &Path, output: &Path, priority: u8, description: &str, compress: bool) -> Result<()> {
    let mut writer = PackageWriter::new(priority, description);
    let mut count = 0usize;
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let rel = path.strip_prefix(dir).unwrap_or(path);
        let logical = rel.to_string_lossy().replace('\\', "/");
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        writer
            .add_entry(&logical, &bytes, compress)
            .with_context(|| format!("pack {logical}"))?;
        count += 1;
    }
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    writer
        .finish_to_path(output)
        .with_context(|| format!("write {}", output.display()))?;
    println!("{}: {count} entries at priority {priority}", output.display());
    Ok(())
}

fn unpack(package_path: &Path, output: &Path) -> Result<()> {
    let package = Package::open(package_path)
        .with_context(|| format!("open {}", package_path.display()))?;
    let paths: Vec<String> = package.entry_paths().map(str::to_string).collect();
    for logical in &paths {
        let bytes = package
            .read_entry(logical)
            .with_context(|| format!("read entry {logical}"))?
            .context("entry vanished from its own directory")?;
        let target = output.join(logical);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&target, bytes).with_context(|| format!("write {}", target.display()))?;
    }
    println!("{}: {} entries extracted", output.display(), paths.len());
    Ok(())
}

fn list(package_path: &Path) -> Result<()> {
    let package = Package::open(package_path)
        .with_context(|| format!("open {}", package_path.display()))?;
    let header = package.header();
    println!(
        "format 0x{:X}, priority {}, cd {}, master {}, \"{}\"",
        header.format_version,
        header.priority,
        header.cd_number,
        header.master,
        header.description
    );
    let mut paths: Vec<&str> = package.entry_paths().collect();
    paths.sort_unstable();
    for path in paths {
        let entry = package.entry(path).expect("listed entry");
        let stored = if entry.is_stored() {
            "stored".to_string()
        } else {
            format!("deflated {} -> {}", entry.size, entry.compressed_size)
        };
        println!("{:>10}  {stored:<24}  {path}", entry.size);
    }
    Ok(())
}

fn verify_save(save: &Path) -> Result<()> {
    let bytes = fs::read(save).with_context(|| format!("read {}", save.display()))?;
    let header = read_save_header(&bytes).context("parse save header")?;
    println!(
        "\"{}\" ({}) game-format {} timestamp {} thumbnail {} bytes, sha256 {}",
        header.name,
        header.description,
        header.game_version,
        header.timestamp,
        header.thumbnail.len(),
        sha256_hex(&bytes)
    );
    Ok(())
}

fn build_manifest(root: &Path, output: &Path) -> Result<()> {
    let mut assets = BTreeMap::new();
    for entry in WalkDir::new(root).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.is_dir() {
            continue;
        }
        let rel = path.strip_prefix(root).unwrap_or(path);
        let rel_str = rel.to_string_lossy().replace('\\', "/");
        let bytes = fs::read(path).with_context(|| format!("read {}", path.display()))?;
        assets.insert(
            rel_str,
            AssetEntry {
                sha256: sha256_hex(&bytes),
                size: bytes.len() as u64,
            },
        );
    }
    let manifest = AssetManifest {
        manifest_version: 1,
        assets,
    };
    let json = serde_json::to_string_pretty(&manifest)?;
    if let Some(parent) = output.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(output, json).with_context(|| format!("write {}", output.display()))?;
    Ok(())
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}
