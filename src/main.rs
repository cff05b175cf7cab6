use std::io::{self, BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use anyhow::{Context, Result};
use tracing::{debug, info, warn};

use igal::info::FileInfo;
use igal::links::{copy_file_to_link_dir, LinkKey, Links};
use igal::media::CacheEvent;
use igal::preview::SlotState;
use igal::{Config, CurrentMedia, Gallery, MediaCache, PreviewStrip};

const HELP: &str = "\
n [N]      next (N times)
p [N]      previous (N times)
pgdn/pgup  skip 10 forward/back
home/end   first/last
r          random
i          file info
c KEY      copy current file to the link dir bound to KEY
g          list link dirs
g NAME     open link dir NAME
d          delete current file
o PATH     open a file or directory
reload     re-read the directory
stats      cache statistics
q          quit";

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("igal=info".parse().context("Invalid log directive")?),
        )
        .init();

    let config = Config::from_env();
    let target = match std::env::args_os().nth(1) {
        Some(arg) => PathBuf::from(arg),
        None => std::env::current_dir().context("Failed to read current directory")?,
    };

    let links = match &config.links_file {
        Some(path) => Links::load(path)?,
        None => Links::default(),
    };

    let cache = Arc::new(MediaCache::new(config.cache_mb));
    let logger = spawn_event_logger(&cache)?;

    let mut gallery = Gallery::new(Arc::clone(&cache), config.precache_window);
    gallery.open(&target)?;
    let preview = PreviewStrip::new(cache);

    let mut viewer = Viewer {
        gallery,
        preview,
        links,
    };
    let stdin = io::stdin();
    viewer.run(&mut stdin.lock(), &mut io::stdout())?;

    // Dropping the viewer drops the last cache reference, which joins the decode
    // workers and closes the event channel.
    drop(viewer);
    if logger.join().is_err() {
        warn!("Cache event logger panicked");
    }
    Ok(())
}

fn spawn_event_logger(cache: &MediaCache) -> Result<JoinHandle<()>> {
    let events = cache.subscribe();
    thread::Builder::new()
        .name("cache-events".into())
        .spawn(move || {
            for event in events.iter() {
                match event {
                    CacheEvent::Decoded { path, bytes } => debug!(?path, bytes, "Decoded"),
                    CacheEvent::Evicted { path, bytes } => debug!(?path, bytes, "Evicted"),
                    CacheEvent::Failed { path, error } => warn!(?path, "Decode failed: {}", error),
                }
            }
        })
        .context("Failed to spawn cache event logger")
}

struct Viewer {
    gallery: Gallery,
    preview: PreviewStrip,
    links: Links,
}

impl Viewer {
    fn run(&mut self, input: &mut impl BufRead, out: &mut impl Write) -> Result<()> {
        self.show(out)?;
        let mut line = String::new();
        loop {
            write!(out, "> ")?;
            out.flush()?;
            line.clear();
            if input.read_line(&mut line)? == 0 {
                return Ok(());
            }

            let mut parts = line.trim().splitn(2, char::is_whitespace);
            let command = parts.next().unwrap_or_default();
            let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());

            match command {
                "" => continue,
                "q" | "quit" => return Ok(()),
                "h" | "help" | "?" => writeln!(out, "{}", HELP)?,
                "n" => self.gallery.next(count(arg)),
                "p" => self.gallery.prev(count(arg)),
                "pgdn" => self.gallery.page_forward(),
                "pgup" => self.gallery.page_back(),
                "home" => self.gallery.first(),
                "end" => self.gallery.last(),
                "r" => self.gallery.random(),
                "i" => self.print_info(out)?,
                "c" => self.copy_to_link(arg, out)?,
                "g" => self.goto_link(arg, out)?,
                "d" => self.delete_current(input, out)?,
                "o" => match arg {
                    Some(path) => report(self.gallery.open(Path::new(path)), out)?,
                    None => writeln!(out, "usage: o PATH")?,
                },
                "reload" => {
                    let result = self.gallery.reload();
                    report(result, out)?;
                }
                "stats" => {
                    let cache = self.gallery.cache();
                    writeln!(
                        out,
                        "{:?} entries={} in_flight={} size={}/{}",
                        cache.stats(),
                        cache.len(),
                        cache.in_flight_count(),
                        cache.current_size(),
                        cache.max_size()
                    )?;
                    continue;
                }
                other => {
                    writeln!(out, "unknown command {:?}, try `help`", other)?;
                    continue;
                }
            }

            if !matches!(command, "h" | "help" | "?" | "i" | "c") {
                self.show(out)?;
            }
        }
    }

    /// Print what the display would show for the current item, then the preview strip.
    fn show(&mut self, out: &mut impl Write) -> Result<()> {
        let Some(entry) = self.gallery.current() else {
            writeln!(out, "(no media)")?;
            return Ok(());
        };
        let position = format!(
            "[{}/{}] {}",
            self.gallery.current_index() + 1,
            self.gallery.len(),
            entry.file_name()
        );

        match self.gallery.current_media() {
            // The main view cannot draw anything without pixels, so it waits here.
            Ok(CurrentMedia::Image(handle)) => match handle.wait() {
                Ok(image) => {
                    writeln!(out, "{} image {}x{}", position, image.width(), image.height())?
                }
                Err(e) => writeln!(out, "{} image failed: {:#}", position, e)?,
            },
            Ok(CurrentMedia::Animation(animation)) => {
                let (w, h) = animation.dimensions();
                writeln!(
                    out,
                    "{} animation {}x{} ({} frames)",
                    position,
                    w,
                    h,
                    animation.frame_count()
                )?
            }
            Ok(CurrentMedia::Video(path)) => writeln!(out, "{} video {:?}", position, path)?,
            Ok(CurrentMedia::Empty) => writeln!(out, "{} (unsupported)", position)?,
            Err(e) => writeln!(out, "{} failed: {:#}", position, e)?,
        }

        self.preview.load(self.gallery.preview_paths());
        self.preview.tick();
        let strip: String = self
            .preview
            .slots()
            .iter()
            .map(|slot| match slot.state() {
                SlotState::NoMedia => ' ',
                SlotState::NotImage(_) => 'v',
                SlotState::Pending(_) => '~',
                SlotState::Ready(_) => '#',
                SlotState::Failed(_) => '!',
            })
            .collect();
        writeln!(out, "preview [{}]", strip)?;
        Ok(())
    }

    fn print_info(&self, out: &mut impl Write) -> Result<()> {
        let Some(entry) = self.gallery.current() else {
            return Ok(());
        };
        let dimensions = self
            .gallery
            .cache()
            .peek(&entry.path)
            .map(|cached| cached.image().dimensions());
        match FileInfo::read(&entry.path, dimensions) {
            Ok(info) => writeln!(out, "{}", info)?,
            Err(e) => writeln!(out, "error: {:#}", e)?,
        }
        Ok(())
    }

    fn copy_to_link(&self, arg: Option<&str>, out: &mut impl Write) -> Result<()> {
        let Some(key) = arg.and_then(LinkKey::parse) else {
            writeln!(out, "usage: c KEY")?;
            return Ok(());
        };
        let Some(link_dir) = self.links.get(key) else {
            writeln!(out, "no link bound to {}", key)?;
            return Ok(());
        };
        let Some(entry) = self.gallery.current() else {
            return Ok(());
        };
        let outcome = copy_file_to_link_dir(&entry.path, link_dir);
        info!(path = ?entry.path, link_dir, %outcome, "Copy to link");
        writeln!(out, "{}", outcome)?;
        Ok(())
    }

    fn goto_link(&mut self, arg: Option<&str>, out: &mut impl Write) -> Result<()> {
        let Some(base) = self.gallery.dirs().first().cloned() else {
            return Ok(());
        };
        match arg {
            None => {
                for dir in self.links.existing_dirs(&base) {
                    writeln!(out, "  {}", dir)?;
                }
            }
            Some(name) => {
                let result = self.gallery.navigate_dir(&base.join(name));
                report(result, out)?;
            }
        }
        Ok(())
    }

    fn delete_current(&mut self, input: &mut impl BufRead, out: &mut impl Write) -> Result<()> {
        let Some(entry) = self.gallery.current() else {
            return Ok(());
        };
        let path = entry.path.clone();
        write!(out, "delete {:?}? [y/N] ", path)?;
        out.flush()?;

        let mut answer = String::new();
        input.read_line(&mut answer)?;
        if !answer.trim().eq_ignore_ascii_case("y") {
            return Ok(());
        }

        match std::fs::remove_file(&path) {
            Ok(()) => {
                info!(?path, "Deleted file");
                self.gallery.remove_current();
            }
            Err(e) => writeln!(out, "error: failed to delete {:?}: {}", path, e)?,
        }
        Ok(())
    }
}

fn report(result: Result<()>, out: &mut impl Write) -> Result<()> {
    if let Err(e) = result {
        writeln!(out, "error: {:#}", e)?;
    }
    Ok(())
}

fn count(arg: Option<&str>) -> usize {
    arg.and_then(|a| a.parse().ok()).filter(|n| *n > 0).unwrap_or(1)
}
