//! Pixel upload and shared-memory completion accounting.

use std::collections::HashMap;

use crate::geometry::{Point, Rect};
use crate::protocol::{ShmBlit, Window, XError, XProtocol};

use super::WindowSystem;

/// Outstanding shared-memory uploads per window.
#[derive(Debug, Default)]
pub(crate) struct PendingPaints {
    counts: HashMap<Window, usize>,
}

impl PendingPaints {
    pub fn add(&mut self, window: Window) {
        *self.counts.entry(window).or_default() += 1;
    }

    /// Decrement, stopping at zero.
    pub fn remove(&mut self, window: Window) {
        if let Some(count) = self.counts.get_mut(&window) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                self.counts.remove(&window);
            }
        }
    }

    pub fn get(&self, window: Window) -> usize {
        self.counts.get(&window).copied().unwrap_or(0)
    }

    /// Forget the window entirely. Returns how many were outstanding.
    pub fn remove_window(&mut self, window: Window) -> usize {
        self.counts.remove(&window).unwrap_or(0)
    }
}

/// Where an image's pixels live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImageStorage {
    /// ZPixmap rows, 32 bits per pixel, no row padding.
    Memory(Vec<u8>),
    /// An attached MIT-SHM segment.
    Shm { shmseg: u32, offset: u32 },
}

/// A client-side image ready for upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Image {
    pub width: u16,
    pub height: u16,
    pub depth: u8,
    pub storage: ImageStorage,
}

impl Image {
    /// In-memory image; `pixels` must hold `width * height` 32-bit values.
    pub fn from_pixels(width: u16, height: u16, depth: u8, pixels: Vec<u8>) -> Self {
        Self {
            width,
            height,
            depth,
            storage: ImageStorage::Memory(pixels),
        }
    }

    fn bounds(&self) -> Rect {
        Rect::new(0, 0, i32::from(self.width), i32::from(self.height))
    }

    /// Pixels of `area`, which must lie inside the image.
    fn rows(&self, pixels: &[u8], area: Rect) -> Vec<u8> {
        let stride = usize::from(self.width) * 4;
        let (x, w) = (area.x as usize * 4, area.width as usize * 4);
        (area.y as usize..area.bottom() as usize)
            .filter_map(|row| pixels.get(row * stride + x..row * stride + x + w))
            .flatten()
            .copied()
            .collect()
    }
}

impl<C: XProtocol> WindowSystem<C> {
    pub fn add_pending_paint_for_window(&self, window: Window) {
        self.state().paints.add(window);
    }

    pub fn remove_pending_paint_for_window(&self, window: Window) {
        self.state().paints.remove(window);
    }

    pub fn get_num_paints_pending_for_window(&self, window: Window) -> usize {
        self.state().paints.get(window)
    }

    /// One shared-memory completion arrived for `window`.
    pub fn process_pending_paints_for_window(&self, window: Window) {
        let mut state = self.state();
        state.paints.remove(window);
        tracing::trace!(
            window = format_args!("0x{window:x}"),
            pending = state.paints.get(window),
            "shm completion"
        );
    }

    /// Upload `area` of `image` so its top-left lands at `dest` in `window`.
    ///
    /// Shared-memory uploads bump the window's pending-paint count; callers
    /// that can only keep one buffer in flight should wait until
    /// [`Self::get_num_paints_pending_for_window`] drops back to zero.
    pub fn blit_to_window(&self, window: Window, image: &Image, dest: Point, area: Rect) -> bool {
        let area = area.intersection(&image.bounds());
        if area.is_empty() {
            return false;
        }
        // Counted before the request goes out so an early completion
        // always finds something to decrement.
        let shm = matches!(image.storage, ImageStorage::Shm { .. });
        if shm {
            self.add_pending_paint_for_window(window);
        }
        let sent = self.with_conn("blit_to_window", |d, conn| {
            match &image.storage {
                ImageStorage::Memory(pixels) => {
                    let data = image.rows(pixels, area);
                    conn.put_image(
                        window,
                        image.depth,
                        dest.x as i16,
                        dest.y as i16,
                        area.width as u16,
                        area.height as u16,
                        &data,
                    )?;
                }
                &ImageStorage::Shm { shmseg, offset } => {
                    if !d.shm {
                        return Err(XError::MissingExtension("MIT-SHM"));
                    }
                    conn.shm_put_image(
                        window,
                        &ShmBlit {
                            shmseg,
                            offset,
                            depth: image.depth,
                            total_width: image.width,
                            total_height: image.height,
                            src_x: area.x as u16,
                            src_y: area.y as u16,
                            dst_x: dest.x as i16,
                            dst_y: dest.y as i16,
                            width: area.width as u16,
                            height: area.height as u16,
                        },
                    )?;
                }
            }
            conn.flush()
        });
        if sent.is_none() && shm {
            self.remove_pending_paint_for_window(window);
        }
        sent.is_some()
    }
}
