/// File-type registry
///
/// Static lookup from ProDOS file-type codes to their three-letter
/// abbreviation, description and a coarse category. Engines never consult
/// this table; it exists for display and for parsing user input.

use crate::filesystem::DosFileType;

/// Broad grouping of file types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileCategory {
    /// Plain or formatted text
    Text,
    /// Machine code or raw binary
    Binary,
    /// Tokenized BASIC programs and variables
    Basic,
    /// Graphics data
    Graphics,
    /// Executables and system files
    System,
    /// Directories
    Directory,
    /// Application documents
    Document,
    /// Source code and object files
    Code,
    /// Anything else
    Other,
}

/// One registry entry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileTypeInfo {
    /// ProDOS type code
    pub code: u8,
    /// Three-letter abbreviation
    pub abbrev: &'static str,
    /// Description
    pub description: &'static str,
    /// Category
    pub category: FileCategory,
}

const fn entry(
    code: u8,
    abbrev: &'static str,
    description: &'static str,
    category: FileCategory,
) -> FileTypeInfo {
    FileTypeInfo {
        code,
        abbrev,
        description,
        category,
    }
}

use FileCategory::*;

/// Known ProDOS file types, sorted by code
pub static FILE_TYPES: &[FileTypeInfo] = &[
    entry(0x00, "UNK", "Typeless file", Other),
    entry(0x01, "BAD", "Bad blocks file", System),
    entry(0x02, "PCD", "Pascal code", Code),
    entry(0x03, "PTX", "Pascal text", Text),
    entry(0x04, "TXT", "ASCII text", Text),
    entry(0x05, "PDA", "Pascal data", Other),
    entry(0x06, "BIN", "Binary", Binary),
    entry(0x07, "FNT", "Apple III font", Graphics),
    entry(0x08, "FOT", "Graphics screen", Graphics),
    entry(0x09, "BA3", "Apple III BASIC program", Basic),
    entry(0x0A, "DA3", "Apple III BASIC data", Basic),
    entry(0x0B, "WPF", "Word processor file", Document),
    entry(0x0C, "SOS", "SOS system file", System),
    entry(0x0F, "DIR", "Directory", Directory),
    entry(0x10, "RPD", "RPS data", Document),
    entry(0x11, "RPI", "RPS index", Document),
    entry(0x19, "ADB", "AppleWorks database", Document),
    entry(0x1A, "AWP", "AppleWorks word processor", Document),
    entry(0x1B, "ASP", "AppleWorks spreadsheet", Document),
    entry(0x20, "TDM", "Desktop manager document", Document),
    entry(0x2A, "8SC", "Apple II source code", Code),
    entry(0x2B, "8OB", "Apple II object code", Code),
    entry(0x2C, "8IC", "Apple II interpreted code", Code),
    entry(0x42, "FTD", "File type definitions", System),
    entry(0x50, "GWP", "Apple IIgs word processor", Document),
    entry(0x51, "GSS", "Apple IIgs spreadsheet", Document),
    entry(0x52, "GDB", "Apple IIgs database", Document),
    entry(0x53, "DRW", "Drawing", Graphics),
    entry(0x54, "GDP", "Desktop publishing", Document),
    entry(0x55, "HMD", "Hypermedia", Document),
    entry(0x5A, "CFG", "Configuration", System),
    entry(0x5B, "ANM", "Animation", Graphics),
    entry(0x5C, "MUM", "Multimedia", Document),
    entry(0x5D, "ENT", "Entertainment", Document),
    entry(0x5E, "DVU", "Development utility", Code),
    entry(0xA0, "WP ", "WordPerfect document", Document),
    entry(0xAB, "GSB", "Apple IIgs BASIC program", Basic),
    entry(0xAC, "TDF", "Apple IIgs BASIC TDF", Basic),
    entry(0xAD, "BDF", "Apple IIgs BASIC data", Basic),
    entry(0xB0, "SRC", "Apple IIgs source code", Code),
    entry(0xB1, "OBJ", "Apple IIgs object code", Code),
    entry(0xB2, "LIB", "Apple IIgs library", Code),
    entry(0xB3, "S16", "GS/OS application", System),
    entry(0xB4, "RTL", "GS/OS run-time library", System),
    entry(0xB5, "EXE", "GS/OS shell application", System),
    entry(0xB6, "PIF", "Permanent initialization", System),
    entry(0xB7, "TIF", "Temporary initialization", System),
    entry(0xB8, "NDA", "New desk accessory", System),
    entry(0xB9, "CDA", "Classic desk accessory", System),
    entry(0xBA, "TOL", "Tool", System),
    entry(0xBB, "DVR", "Apple IIgs device driver", System),
    entry(0xBC, "LDF", "Load file", System),
    entry(0xBD, "FST", "GS/OS file system translator", System),
    entry(0xBF, "DOC", "GS/OS document", Document),
    entry(0xC0, "PNT", "Packed super hi-res picture", Graphics),
    entry(0xC1, "PIC", "Super hi-res picture", Graphics),
    entry(0xC2, "ANI", "Paintworks animation", Graphics),
    entry(0xC3, "PAL", "Paintworks palette", Graphics),
    entry(0xC5, "OOG", "Object-oriented graphics", Graphics),
    entry(0xC6, "SCR", "Script", Code),
    entry(0xC7, "CDV", "Control panel document", System),
    entry(0xC8, "FON", "Font", Graphics),
    entry(0xC9, "FND", "Finder data", System),
    entry(0xCA, "ICN", "Icons", Graphics),
    entry(0xD5, "MUS", "Music", Document),
    entry(0xD6, "INS", "Instrument", Document),
    entry(0xD7, "MID", "MIDI", Document),
    entry(0xD8, "SND", "Sampled sound", Document),
    entry(0xDB, "DBM", "DB master document", Document),
    entry(0xE0, "LBR", "Archive", Other),
    entry(0xE2, "ATK", "AppleTalk data", Other),
    entry(0xEE, "R16", "EDASM 816 relocatable", Code),
    entry(0xEF, "PAS", "Pascal area", System),
    entry(0xF0, "CMD", "ProDOS command", System),
    entry(0xF9, "OS ", "GS/OS system file", System),
    entry(0xFA, "INT", "Integer BASIC program", Basic),
    entry(0xFB, "IVR", "Integer BASIC variables", Basic),
    entry(0xFC, "BAS", "Applesoft BASIC program", Basic),
    entry(0xFD, "VAR", "Applesoft BASIC variables", Basic),
    entry(0xFE, "REL", "Relocatable code", Code),
    entry(0xFF, "SYS", "ProDOS system file", System),
];

/// Look up a type code
pub fn lookup(code: u8) -> Option<&'static FileTypeInfo> {
    FILE_TYPES
        .binary_search_by_key(&code, |info| info.code)
        .ok()
        .map(|i| &FILE_TYPES[i])
}

/// Display name for a type code: the abbreviation, or `$XX` when unknown
pub fn type_name(code: u8) -> String {
    match lookup(code) {
        Some(info) => info.abbrev.trim_end().to_string(),
        None => format!("${:02X}", code),
    }
}

/// Description for a type code
pub fn description(code: u8) -> &'static str {
    lookup(code).map_or("Unknown", |info| info.description)
}

/// Parse a type from an abbreviation (`BIN`), hex (`$06`, `0x06`) or decimal
pub fn parse_type(text: &str) -> Option<u8> {
    let text = text.trim();
    if let Some(hex) = text
        .strip_prefix('$')
        .or_else(|| text.strip_prefix("0x"))
        .or_else(|| text.strip_prefix("0X"))
    {
        return u8::from_str_radix(hex, 16).ok();
    }
    if let Some(info) = FILE_TYPES
        .iter()
        .find(|info| info.abbrev.trim_end().eq_ignore_ascii_case(text))
    {
        return Some(info.code);
    }
    text.parse().ok()
}

/// ProDOS type code equivalent to a DOS 3.3 file type
pub fn prodos_type_for_dos(dos: DosFileType) -> u8 {
    match dos {
        DosFileType::Text => 0x04,
        DosFileType::Integer => 0xFA,
        DosFileType::Applesoft => 0xFC,
        DosFileType::Binary => 0x06,
        DosFileType::Relocatable => 0xFE,
        DosFileType::S | DosFileType::A | DosFileType::B => 0x00,
    }
}

/// DOS 3.3 file type equivalent to a ProDOS type code
pub fn dos_type_for_prodos(code: u8) -> Option<DosFileType> {
    match code {
        0x04 => Some(DosFileType::Text),
        0xFA => Some(DosFileType::Integer),
        0xFC => Some(DosFileType::Applesoft),
        0x06 => Some(DosFileType::Binary),
        0xFE => Some(DosFileType::Relocatable),
        _ => None,
    }
}

/// Name of a UCSD Pascal file kind
pub fn pascal_kind_name(kind: u8) -> &'static str {
    match kind & 0x0F {
        0 => "Volume",
        1 => "Bad",
        2 => "Code",
        3 => "Text",
        4 => "Info",
        5 => "Data",
        6 => "Graf",
        7 => "Foto",
        8 => "SecureDir",
        _ => "Unknown",
    }
}

/// ProDOS type code equivalent to a UCSD Pascal file kind
pub fn prodos_type_for_pascal(kind: u8) -> u8 {
    match kind & 0x0F {
        1 => 0x01,
        2 => 0x02,
        3 => 0x03,
        6 | 7 => 0x08,
        _ => 0x05,
    }
}
