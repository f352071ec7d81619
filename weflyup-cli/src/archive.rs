//! Firmware archive handling.
//!
//! Wefly firmware ships as a password-protected RAR archive holding one
//! FPGA image (`.mcs`) and one MCU image (`.hex`). The password is derived
//! from the archive name and extraction is delegated to an external tool.

use {
    anyhow::{Context, Result, bail},
    log::{debug, info},
    rust_i18n::t,
    std::{
        env,
        ffi::{OsStr, OsString},
        fs,
        path::{Path, PathBuf},
        process::Command,
    },
};

/// Added to the version number found in the archive name.
pub const PASSWORD_BASE: i64 = 990_401;

/// Where to get an extraction tool when none is installed.
pub const EXTRACTOR_DOWNLOAD_URL: &str = "https://www.win-rar.com/download.html";

/// Derive the archive password from its file name.
///
/// Every trailing `.rar` is stripped, then the last run of digits is added
/// to [`PASSWORD_BASE`]. Names without digits use 0.
///
/// `wefly_v01_162.rar` gives `990563`.
pub fn derive_password(archive: &Path) -> i64 {
    let mut name = archive
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    while name.len() >= 4
        && name.is_char_boundary(name.len() - 4)
        && name[name.len() - 4..].eq_ignore_ascii_case(".rar")
    {
        name.truncate(name.len() - 4);
    }

    let number = last_digit_run(&name)
        .and_then(|digits| digits.parse::<i32>().ok())
        .unwrap_or(0);
    PASSWORD_BASE + i64::from(number)
}

/// Last maximal run of ASCII digits in `text`.
fn last_digit_run(text: &str) -> Option<&str> {
    let end = text.rfind(|c: char| c.is_ascii_digit())? + 1;
    let start = text[..end]
        .rfind(|c: char| !c.is_ascii_digit())
        .map_or(0, |i| i + 1);
    Some(&text[start..end])
}

/// Whether `path` names a RAR archive.
pub fn is_rar(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("rar"))
}

/// Command-line dialect of an extraction tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorKind {
    /// `unrar`, `rar`, `UnRAR.exe` or `WinRAR.exe`.
    Rar,
    /// `7z`.
    SevenZip,
}

/// Tool names probed on `PATH`, in order of preference.
const CANDIDATES: &[(&str, ExtractorKind)] = &[
    ("unrar", ExtractorKind::Rar),
    ("rar", ExtractorKind::Rar),
    ("UnRAR", ExtractorKind::Rar),
    ("WinRAR", ExtractorKind::Rar),
    ("7z", ExtractorKind::SevenZip),
];

/// External program able to unpack firmware archives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Extractor {
    /// Executable to run.
    pub program: PathBuf,
    /// Argument dialect.
    pub kind: ExtractorKind,
}

impl Extractor {
    /// Wrap `program`, guessing its dialect from the file name.
    pub fn from_program(program: impl Into<PathBuf>) -> Self {
        let program = program.into();
        let stem = program
            .file_stem()
            .map(|s| s.to_string_lossy().to_ascii_lowercase())
            .unwrap_or_default();
        let kind = if stem.starts_with("7z") {
            ExtractorKind::SevenZip
        } else {
            ExtractorKind::Rar
        };
        Self { program, kind }
    }

    /// Find an extraction tool.
    ///
    /// A configured tool is used as-is when it names an existing file, or
    /// looked up on `PATH` otherwise. Without one, the usual WinRAR install
    /// locations (Windows only) and then `PATH` are searched.
    pub fn find(configured: Option<&Path>) -> Result<Self> {
        if let Some(tool) = configured {
            if tool.is_file() {
                return Ok(Self::from_program(tool));
            }
            return find_on_path(tool.as_os_str())
                .map(Self::from_program)
                .ok_or_else(|| {
                    crate::CliError::Config(
                        t!("archive.configured_tool_missing", tool = tool.display()).to_string(),
                    )
                    .into()
                });
        }

        if let Some(program) = windows_install_candidates()
            .into_iter()
            .find(|p| p.is_file())
        {
            return Ok(Self::from_program(program));
        }

        for (name, kind) in CANDIDATES {
            if let Some(program) = find_on_path(OsStr::new(name)) {
                debug!("Using extractor {}", program.display());
                return Ok(Self {
                    program,
                    kind: *kind,
                });
            }
        }

        bail!(
            "{}",
            t!("archive.no_extractor", url = EXTRACTOR_DOWNLOAD_URL)
        )
    }

    /// Arguments extracting `archive` into `out_dir`.
    pub fn args(&self, archive: &Path, password: i64, out_dir: &Path) -> Vec<OsString> {
        let password = OsString::from(format!("-p{password}"));
        match self.kind {
            ExtractorKind::Rar => vec![
                "x".into(),
                "-y".into(),
                password,
                archive.into(),
                out_dir.into(),
            ],
            ExtractorKind::SevenZip => {
                let mut output = OsString::from("-o");
                output.push(out_dir);
                vec!["x".into(), password, "-y".into(), output, archive.into()]
            },
        }
    }

    /// Unpack `archive` into `out_dir`.
    pub fn extract(&self, archive: &Path, password: i64, out_dir: &Path) -> Result<()> {
        fs::create_dir_all(out_dir)
            .with_context(|| format!("Failed to create directory: {}", out_dir.display()))?;

        let output = Command::new(&self.program)
            .args(self.args(archive, password, out_dir))
            .output()
            .with_context(|| {
                t!("archive.run_failed", tool = self.program.display()).to_string()
            })?;

        debug!(
            "{} output:\n{}\n{}",
            self.program.display(),
            String::from_utf8_lossy(&output.stdout),
            String::from_utf8_lossy(&output.stderr)
        );

        if !output.status.success() {
            let code = output
                .status
                .code()
                .map_or_else(|| "signal".to_string(), |c| c.to_string());
            bail!(
                "{}",
                t!(
                    "archive.extract_failed",
                    archive = archive.display(),
                    code = code
                )
            );
        }

        info!("Extracted {} into {}", archive.display(), out_dir.display());
        Ok(())
    }
}

/// Look `name` up in the directories of `PATH`.
fn find_on_path(name: &OsStr) -> Option<PathBuf> {
    let path = env::var_os("PATH")?;
    env::split_paths(&path).find_map(|dir| {
        let candidate = dir.join(name);
        if candidate.is_file() {
            return Some(candidate);
        }
        if cfg!(windows) {
            let exe = candidate.with_extension("exe");
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

/// Default WinRAR locations.
fn windows_install_candidates() -> Vec<PathBuf> {
    if !cfg!(windows) {
        return Vec::new();
    }
    ["ProgramFiles", "ProgramFiles(x86)"]
        .iter()
        .filter_map(|var| env::var_os(var))
        .flat_map(|root| {
            let dir = PathBuf::from(root).join("WinRAR");
            [dir.join("UnRAR.exe"), dir.join("WinRAR.exe")]
        })
        .collect()
}

/// FPGA and MCU images of one firmware release.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImagePair {
    /// FPGA image (`.mcs`).
    pub mcs: PathBuf,
    /// MCU image (`.hex`).
    pub hex: PathBuf,
}

/// Find the first `.mcs` and the first `.hex` file below `dir`.
///
/// Files are visited in sorted path order so the choice is stable.
pub fn locate_images(dir: &Path) -> Result<ImagePair> {
    let mut files = Vec::new();
    collect_files(dir, &mut files)
        .with_context(|| format!("Failed to read directory: {}", dir.display()))?;
    files.sort();

    let find = |ext: &str| {
        files
            .iter()
            .find(|p| {
                p.extension()
                    .is_some_and(|e| e.eq_ignore_ascii_case(ext))
            })
            .cloned()
    };

    match (find("mcs"), find("hex")) {
        (Some(mcs), Some(hex)) => Ok(ImagePair { mcs, hex }),
        _ => bail!("{}", t!("archive.images_missing", dir = dir.display())),
    }
}

fn collect_files(dir: &Path, out: &mut Vec<PathBuf>) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if path.is_dir() {
            collect_files(&path, out)?;
        } else {
            out.push(path);
        }
    }
    Ok(())
}
