//! Display Module
//!
//! Static facts about the display a context is attached to: which optional
//! extensions the server offers and the geometry/pixel format of the screen.

/// Optional server extensions. Every feature built on one degrades when it is absent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Extensions {
    pub have_composite: bool,
    pub have_damage: bool,
    pub have_fixes: bool,
    pub have_shape: bool,
    pub have_shm: bool,
    pub have_xtest: bool,
    pub have_xkb: bool,

    // Extension version info
    pub composite_version: (u32, u32),
    pub damage_version: (u32, u32),
    pub fixes_version: (u32, u32),
}

impl Extensions {
    /// Every extension present, used by in-memory servers
    pub fn all() -> Self {
        Self {
            have_composite: true,
            have_damage: true,
            have_fixes: true,
            have_shape: true,
            have_shm: true,
            have_xtest: true,
            have_xkb: true,
            composite_version: (0, 4),
            damage_version: (1, 1),
            fixes_version: (5, 0),
        }
    }

    /// Composite pixmaps require Composite 0.2 or newer
    pub fn have_name_window_pixmap(&self) -> bool {
        self.have_composite && self.composite_version >= (0, 2)
    }
}

/// Screen the context manages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScreenInfo {
    /// Screen number
    pub screen_num: usize,
    /// Root window
    pub root: u32,
    pub width: u16,
    pub height: u16,
    /// Root depth
    pub depth: u8,
    /// Bits per pixel of the root depth's pixmap format
    pub bits_per_pixel: u8,
    /// Scanline padding in bits of the root depth's pixmap format
    pub scanline_pad: u8,
}

impl ScreenInfo {
    /// Bytes needed for a ZPixmap image of the given size in the screen's native format
    pub fn image_size(&self, width: u32, height: u32) -> usize {
        let bpp = self.bits_per_pixel.max(1) as usize;
        let pad = self.scanline_pad.max(8) as usize;
        let stride_bits = (width as usize * bpp).div_ceil(pad) * pad;
        stride_bits / 8 * height as usize
    }
}
