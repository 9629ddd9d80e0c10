/// Interactive Apple II disk console application

use a2disk::filetypes::{self, FILE_TYPES};
use a2disk::map::draw_usage_map;
use a2disk::*;
use rustyline::completion::{Completer, Pair};
use rustyline::error::ReadlineError;
use rustyline::highlight::Highlighter;
use rustyline::hint::Hinter;
use rustyline::validate::Validator;
use rustyline::{Context, Editor, Helper};
use std::fs;

/// Command completer for the REPL
struct CommandCompleter {
    commands: Vec<&'static str>,
}

impl CommandCompleter {
    fn new() -> Self {
        Self {
            commands: vec![
                "cat", "cd", "create", "dir", "exit", "export", "help", "import", "info", "lock",
                "ls", "map", "mkdir", "mv", "open", "quit", "read", "rename", "rm", "save",
                "settype", "types", "unlock",
            ],
        }
    }
}

impl Completer for CommandCompleter {
    type Candidate = Pair;

    fn complete(
        &self,
        line: &str,
        pos: usize,
        _ctx: &Context<'_>,
    ) -> rustyline::Result<(usize, Vec<Pair>)> {
        // Only complete the first word (command name)
        let line_to_cursor = &line[..pos];
        if line_to_cursor.contains(' ') {
            return Ok((pos, vec![]));
        }

        let prefix = line_to_cursor.to_lowercase();
        let matches: Vec<Pair> = self
            .commands
            .iter()
            .filter(|cmd| cmd.starts_with(&prefix))
            .map(|cmd| Pair {
                display: cmd.to_string(),
                replacement: cmd.to_string(),
            })
            .collect();

        Ok((0, matches))
    }
}

impl Hinter for CommandCompleter {
    type Hint = String;
}

impl Highlighter for CommandCompleter {}
impl Validator for CommandCompleter {}
impl Helper for CommandCompleter {}

/// Get the path to the history file
fn history_path() -> Option<std::path::PathBuf> {
    dirs::home_dir().map(|mut p| {
        p.push(".a2disk_history");
        p
    })
}

/// Mounted volume plus the console's working directory
struct Session {
    volume: Volume,
    path: Option<String>,
    /// Directories from the root down to the current one
    cwd: Vec<DirectoryEntry>,
}

impl Session {
    fn new(volume: Volume, path: Option<String>) -> Self {
        let root = volume.root();
        Self {
            volume,
            path,
            cwd: vec![root],
        }
    }

    fn current_dir(&self) -> &DirectoryEntry {
        // cwd always holds at least the root
        &self.cwd[self.cwd.len() - 1]
    }

    fn prompt(&self) -> String {
        let names: Vec<&str> = self.cwd.iter().map(|d| d.name.as_str()).collect();
        format!("/{}> ", names.join("/"))
    }

    /// Resolve a name relative to the current directory, or absolute with a leading '/'
    fn resolve(&self, name: &str) -> Result<DirectoryEntry> {
        if let Some(absolute) = name.strip_prefix('/') {
            return self.volume.lookup(absolute);
        }
        let mut current = self.current_dir().clone();
        for part in name.split('/').filter(|p| !p.is_empty()) {
            let found = self
                .volume
                .list(&current)?
                .into_iter()
                .find(|e| e.name.eq_ignore_ascii_case(part));
            match found {
                Some(entry) => current = entry,
                // Archive records carry '/' inside their names
                None => return self.volume.lookup(name),
            }
        }
        Ok(current)
    }

    /// Re-read the working directory chain after a mutation
    fn refresh_cwd(&mut self) {
        let mut fresh = vec![self.volume.root()];
        for dir in self.cwd.iter().skip(1) {
            let parent = &fresh[fresh.len() - 1];
            let next = self
                .volume
                .list(parent)
                .ok()
                .and_then(|entries| entries.into_iter().find(|e| e.first_block == dir.first_block));
            match next {
                Some(entry) => fresh.push(entry),
                None => break,
            }
        }
        self.cwd = fresh;
    }
}

fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    println!("=== a2disk ===");
    println!("Interactive console for Apple II disk images and ShrinkIt archives.");
    println!("Type 'help' for available commands\n");

    let mut rl = Editor::new()?;
    rl.set_helper(Some(CommandCompleter::new()));

    if let Some(history_path) = history_path() {
        let _ = rl.load_history(&history_path);
    }

    let mut session: Option<Session> = None;

    loop {
        let prompt = session
            .as_ref()
            .map(|s| s.prompt())
            .unwrap_or_else(|| "> ".to_string());
        let input = match rl.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) => {
                println!("^C");
                continue;
            }
            Err(ReadlineError::Eof) => break,
            Err(err) => {
                println!("Error: {:?}", err);
                break;
            }
        };

        let input = input.trim();
        if input.is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(input);

        let parts = parse_command_line(input);
        if parts.is_empty() {
            continue;
        }
        let command = parts[0].to_lowercase();
        let args = &parts[1..];

        match command.as_str() {
            "help" => print_help(),
            "quit" | "exit" => break,
            "types" => print_types(),
            "open" => {
                let Some(path) = args.first() else {
                    println!("Usage: open <path>");
                    continue;
                };
                match Volume::open_path(path) {
                    Ok(volume) => {
                        println!("Opened: {} ({})", path, volume.fs_type());
                        session = Some(Session::new(volume, Some(path.clone())));
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            "create" => {
                let preset = args.first().map(String::as_str).unwrap_or("prodos140");
                let Some(mut spec) = ImageSpec::from_name(preset) else {
                    println!(
                        "Unknown preset '{}'. Choose one of: {}",
                        preset,
                        ImageSpec::preset_names().join(", ")
                    );
                    continue;
                };
                if let Some(name) = args.get(1) {
                    spec.volume_name = name.clone();
                }
                match DiskImage::create(spec).and_then(Volume::open) {
                    Ok(volume) => {
                        println!("Created new {} volume", volume.fs_type());
                        session = Some(Session::new(volume, None));
                    }
                    Err(e) => println!("Error: {}", e),
                }
            }
            _ => {
                let Some(s) = session.as_mut() else {
                    println!("No volume loaded. Use 'open <path>' or 'create' first.");
                    continue;
                };
                if let Err(e) = run_volume_command(s, &command, args) {
                    println!("Error: {}", e);
                }
            }
        }
    }

    if let Some(history_path) = history_path() {
        let _ = rl.save_history(&history_path);
    }
    if session.as_ref().is_some_and(|s| s.volume.is_changed()) {
        println!("Warning: unsaved changes discarded.");
    }
    println!("Goodbye!");
    Ok(())
}

/// Commands that need a mounted volume
fn run_volume_command(s: &mut Session, command: &str, args: &[String]) -> Result<()> {
    match command {
        "info" => print_info(&s.volume)?,
        "ls" | "dir" | "cat" => {
            let dir = match args.first() {
                Some(name) => s.resolve(name)?,
                None => s.current_dir().clone(),
            };
            list_directory(&s.volume, &dir)?;
        }
        "cd" => match args.first().map(String::as_str) {
            None | Some("/") => s.cwd.truncate(1),
            Some("..") => {
                if s.cwd.len() > 1 {
                    s.cwd.pop();
                }
            }
            Some(name) => {
                let dir = s.resolve(name)?;
                if !dir.is_directory {
                    return Err(DiskError::NotADirectory(dir.name));
                }
                if name.starts_with('/') {
                    s.cwd.truncate(1);
                }
                s.cwd.push(dir);
            }
        },
        "read" => {
            let Some(name) = args.first() else {
                println!("Usage: read <file>");
                return Ok(());
            };
            let entry = s.resolve(name)?;
            let data = s.volume.read_file(&entry)?;
            println!("{} ({} bytes):", entry.name, data.len());
            print_hex_dump(&data, 512);
        }
        "export" => {
            let Some(name) = args.first() else {
                println!("Usage: export <file> [output_path]");
                return Ok(());
            };
            let entry = s.resolve(name)?;
            let data = s.volume.read_file(&entry)?;
            let output = args
                .get(1)
                .cloned()
                .unwrap_or_else(|| entry.name.replace('/', "_"));
            fs::write(&output, &data)?;
            println!("Exported {} ({} bytes) to {}", entry.name, data.len(), output);
            let fork = s.volume.read_resource_fork(&entry)?;
            if !fork.is_empty() {
                let fork_path = format!("{}.rsrc", output);
                fs::write(&fork_path, &fork)?;
                println!("Resource fork ({} bytes) written to {}", fork.len(), fork_path);
            }
        }
        "import" => {
            let Some(host) = args.first() else {
                println!("Usage: import <host_path> [name] [type] [aux]");
                return Ok(());
            };
            let data = fs::read(host)?;
            let name = match args.get(1) {
                Some(name) => name.to_uppercase(),
                None => std::path::Path::new(host)
                    .file_name()
                    .and_then(|n| n.to_str())
                    .unwrap_or("FILE")
                    .to_uppercase(),
            };
            let file_type = match args.get(2) {
                Some(t) => parse_type_arg(t)?,
                None => 0x06,
            };
            let aux_type = match args.get(3) {
                Some(a) => parse_u16(a)?,
                None => 0,
            };
            let dir = s.current_dir().clone();
            let entry = s.volume.create_file(&dir, &name, file_type, aux_type, &data)?;
            println!("Imported {} ({} bytes, {} blocks)", entry.name, entry.size_bytes, entry.blocks_used);
            s.refresh_cwd();
        }
        "mkdir" => {
            let Some(name) = args.first() else {
                println!("Usage: mkdir <name>");
                return Ok(());
            };
            let dir = s.current_dir().clone();
            s.volume.create_directory(&dir, &name.to_uppercase())?;
            s.refresh_cwd();
        }
        "rm" => {
            let Some(name) = args.first() else {
                println!("Usage: rm <name> [-r]");
                return Ok(());
            };
            let recursive = args.iter().any(|a| a == "-r");
            let entry = s.resolve(name)?;
            s.volume.delete(&entry, recursive)?;
            s.refresh_cwd();
        }
        "rename" => {
            let (Some(name), Some(new_name)) = (args.first(), args.get(1)) else {
                println!("Usage: rename <name> <new_name>");
                return Ok(());
            };
            let entry = s.resolve(name)?;
            s.volume.rename(&entry, &new_name.to_uppercase())?;
            s.refresh_cwd();
        }
        "mv" => {
            let (Some(name), Some(dest)) = (args.first(), args.get(1)) else {
                println!("Usage: mv <name> <directory>");
                return Ok(());
            };
            let entry = s.resolve(name)?;
            let dir = s.resolve(dest)?;
            s.volume.move_entry(&entry, &dir)?;
            s.refresh_cwd();
        }
        "settype" => {
            let (Some(name), Some(type_arg)) = (args.first(), args.get(1)) else {
                println!("Usage: settype <name> <type> [aux]");
                return Ok(());
            };
            let entry = s.resolve(name)?;
            let file_type = parse_type_arg(type_arg)?;
            let aux_type = match args.get(2) {
                Some(a) => parse_u16(a)?,
                None => entry.aux_type,
            };
            let entry = s.volume.change_type(&entry, file_type, aux_type)?;
            println!("{} is now {} ${:04X}", entry.name, entry.type_name(), entry.aux_type);
        }
        "lock" | "unlock" => {
            let Some(name) = args.first() else {
                println!("Usage: {} <name>", command);
                return Ok(());
            };
            let entry = s.resolve(name)?;
            s.volume.set_locked(&entry, command == "lock")?;
        }
        "map" => draw_usage_map(&s.volume)?,
        "save" => {
            let Some(path) = args.first().cloned().or_else(|| s.path.clone()) else {
                println!("Usage: save <path>");
                return Ok(());
            };
            s.volume.save(&path)?;
            println!("Saved to: {}", path);
            s.path = Some(path);
        }
        _ => println!("Unknown command: {}. Type 'help' for available commands.", command),
    }
    Ok(())
}

fn parse_type_arg(text: &str) -> Result<u8> {
    filetypes::parse_type(text)
        .ok_or_else(|| DiskError::unsupported(format!("file type '{}'", text)))
}

fn parse_u16(text: &str) -> Result<u16> {
    let parsed = match text
        .strip_prefix('$')
        .or_else(|| text.strip_prefix("0x"))
        .or_else(|| text.strip_prefix("0X"))
    {
        Some(hex) => u16::from_str_radix(hex, 16).ok(),
        None => text.parse().ok(),
    };
    parsed.ok_or_else(|| DiskError::unsupported(format!("aux type '{}'", text)))
}

/// Parse command line respecting quoted strings
fn parse_command_line(input: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut in_quotes = false;

    for ch in input.chars() {
        match ch {
            '"' => in_quotes = !in_quotes,
            ' ' | '\t' if !in_quotes => {
                if !current.is_empty() {
                    parts.push(std::mem::take(&mut current));
                }
            }
            _ => current.push(ch),
        }
    }

    if !current.is_empty() {
        parts.push(current);
    }

    parts
}

fn print_help() {
    println!("Available commands:");
    println!("  open <path>                    - Open an image or archive (use quotes for paths with spaces)");
    println!("  create [preset] [name]         - Create a blank volume ({})", ImageSpec::preset_names().join(", "));
    println!("  info                           - Show volume information");
    println!("  ls [dir]                       - List a directory (cat, dir)");
    println!("  cd <dir|..|/>                  - Change the working directory");
    println!("  read <file>                    - Hex dump a file");
    println!("  export <file> [output_path]    - Copy a file to the host (resource fork to <output>.rsrc)");
    println!("  import <host> [name] [type] [aux] - Copy a host file in (type defaults to BIN)");
    println!("  mkdir <name>                   - Create a directory");
    println!("  rm <name> [-r]                 - Delete a file or directory");
    println!("  rename <name> <new_name>       - Rename an entry");
    println!("  mv <name> <dir>                - Move an entry to another directory");
    println!("  settype <name> <type> [aux]    - Change file and aux type");
    println!("  lock <name>, unlock <name>     - Set or clear the lock");
    println!("  map                            - Visual block usage map");
    println!("  types                          - List known file types");
    println!("  save [path]                    - Save the image (defaults to the opened path)");
    println!("  help                           - Show this help");
    println!("  quit, exit                     - Exit");
}

fn print_info(volume: &Volume) -> Result<()> {
    let info = volume.info()?;
    println!("Filesystem:  {}", info.fs_type);
    println!("Volume:      {}", info.volume_name);
    if let Some(image) = volume.image() {
        println!("Container:   {} ({:?} order)", image.kind().name(), image.order());
        if let Some(comment) = image.comment() {
            println!("Comment:     {}", comment);
        }
    }
    println!("Unit size:   {} bytes", info.block_size);
    println!("Total units: {}", info.total_blocks);
    println!("Free units:  {} ({} bytes)", info.free_blocks, info.free_bytes());
    println!("Used:        {} bytes", info.used_bytes());
    if volume.is_changed() {
        println!("Modified:    yes (not saved)");
    }
    Ok(())
}

fn list_directory(volume: &Volume, dir: &DirectoryEntry) -> Result<()> {
    let entries = volume.list(dir)?;
    println!(
        "  {:<24} {:>4} {:>6} {:>8} {:>6}  {:<16}",
        "Name", "Type", "Aux", "Size", "Blocks", "Modified"
    );
    for entry in &entries {
        let modified = entry
            .modified_at
            .map(|d| d.format("%d-%b-%y %H:%M").to_string())
            .unwrap_or_default();
        println!(
            "{} {:<24} {:>4} ${:04X} {:>8} {:>6}  {:<16}",
            if entry.locked { '*' } else { ' ' },
            entry.name,
            entry.type_name(),
            entry.aux_type,
            entry.size_bytes,
            entry.blocks_used,
            modified
        );
    }
    println!("{} entries", entries.len());
    Ok(())
}

fn print_types() {
    for info in FILE_TYPES {
        println!("${:02X} {:<4} {}", info.code, info.abbrev, info.description);
    }
}

/// Print hex dump of data
fn print_hex_dump(data: &[u8], max_bytes: usize) {
    let len = data.len().min(max_bytes);

    for (i, chunk) in data[..len].chunks(16).enumerate() {
        print!("{:04X}: ", i * 16);

        for (j, byte) in chunk.iter().enumerate() {
            print!("{:02X} ", byte);
            if j == 7 {
                print!(" ");
            }
        }

        // Pad if less than 16 bytes
        for j in chunk.len()..16 {
            print!("   ");
            if j == 7 {
                print!(" ");
            }
        }

        print!(" |");
        for byte in chunk {
            // Apple II text is often stored with the high bit set
            let b = byte & 0x7F;
            let c = if (32..127).contains(&b) { b as char } else { '.' };
            print!("{}", c);
        }
        println!("|");
    }

    if data.len() > max_bytes {
        println!("... ({} more bytes)", data.len() - max_bytes);
    }
}
