//! Built-in sample pages.
//!
//! Used to seed an empty content directory and as test fixtures. Each page
//! is a 640x480 gradient with a dark title bar and a row of interactive
//! button zones.

use std::path::Path;

use crate::error::Result;
use crate::page::{Behavior, Category, Compression, Page, PageMetadata, PixelFormat};
use crate::pxnt;

const WIDTH: u16 = 640;
const HEIGHT: u16 = 480;
const TITLE_BAR_HEIGHT: usize = 60;

/// One clickable element of a sample page.
struct Element {
    label: &'static str,
    x: usize,
    y: usize,
    w: usize,
    h: usize,
    behavior: Behavior,
}

fn nav(target: &str) -> Behavior {
    Behavior::Navigate {
        target: target.to_string(),
        debounce_ms: 100,
    }
}

fn emit(name: &str) -> Behavior {
    Behavior::EmitEvent {
        name: name.to_string(),
        event_type: 0,
        debounce_ms: 100,
    }
}

/// The demo landing page with Home/About/Demo buttons.
pub fn index_page() -> Page {
    build_page(
        "index",
        "Welcome to PIXNET",
        vec![
            Element {
                label: "home",
                x: 50,
                y: 100,
                w: 80,
                h: 30,
                behavior: nav("index"),
            },
            Element {
                label: "about",
                x: 150,
                y: 100,
                w: 80,
                h: 30,
                behavior: nav("about"),
            },
            Element {
                label: "demo",
                x: 250,
                y: 100,
                w: 80,
                h: 30,
                behavior: emit("demo_click"),
            },
        ],
    )
}

/// The demo about page with a single Back button.
pub fn about_page() -> Page {
    build_page(
        "about",
        "About PIXNET",
        vec![Element {
            label: "back",
            x: 50,
            y: 50,
            w: 60,
            h: 30,
            behavior: nav("index"),
        }],
    )
}

/// A bare index page, used when a content directory has no usable index.
pub fn minimal_index() -> Page {
    build_page(
        "index",
        "PIXNET Server",
        vec![Element {
            label: "home",
            x: 50,
            y: 100,
            w: 80,
            h: 30,
            behavior: nav("index"),
        }],
    )
}

/// Writes the index and about sample pages into `dir`.
pub fn write_sample_pages(dir: &Path) -> Result<()> {
    pxnt::save(&dir.join("index.pxnt"), &index_page())?;
    pxnt::save(&dir.join("about.pxnt"), &about_page())?;
    Ok(())
}

fn build_page(name: &str, title: &str, elements: Vec<Element>) -> Page {
    let (w, h) = (WIDTH as usize, HEIGHT as usize);
    let mut pixels = vec![0u8; w * h * 4];
    let mut category_map = vec![0u8; w * h * 2];

    for y in 0..h {
        let (r, g, b) = match name {
            "index" => (50, 100 + (y * 100 / h) as u8, 200),
            "about" => (100 + (y * 100 / h) as u8, 150, 100),
            _ => (150, 100, 150 + (y * 100 / h) as u8),
        };
        for x in 0..w {
            let idx = (y * w + x) * 4;
            let color = if y < TITLE_BAR_HEIGHT {
                [30, 30, 60, 255]
            } else {
                [r, g, b, 255]
            };
            pixels[idx..idx + 4].copy_from_slice(&color);
        }
    }

    let mut categories = Vec::with_capacity(elements.len());
    for (i, element) in elements.into_iter().enumerate() {
        let id = (i + 1) as u16;
        for ey in 0..element.h {
            for ex in 0..element.w {
                let (px, py) = (element.x + ex, element.y + ey);
                if px < w && py < h {
                    let idx = (py * w + px) * 4;
                    pixels[idx..idx + 4].copy_from_slice(&[200, 200, 255, 255]);
                    let map_idx = (py * w + px) * 2;
                    category_map[map_idx..map_idx + 2].copy_from_slice(&id.to_le_bytes());
                }
            }
        }
        categories.push(Category {
            id,
            name: format!("{}_{id}", element.label),
            priority: 128,
            behavior: element.behavior,
        });
    }

    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or_default();

    Page {
        width: WIDTH,
        height: HEIGHT,
        pixel_format: PixelFormat::Rgba8,
        compression: Compression::None,
        flags: 0,
        created: now,
        modified: now,
        metadata: PageMetadata {
            title: title.to_string(),
            ..PageMetadata::default()
        },
        pixels,
        category_map,
        categories,
        animation: Vec::new(),
        audio: None,
        extended_metadata: Vec::new(),
    }
}
