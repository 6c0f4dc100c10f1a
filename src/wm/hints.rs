//! Hints Module
//!
//! ICCCM `WM_NORMAL_HINTS` (size hints) and the parts of `WM_HINTS` the core uses.

pub const P_MIN_SIZE: u32 = 1 << 4;
pub const P_MAX_SIZE: u32 = 1 << 5;
pub const P_RESIZE_INC: u32 = 1 << 6;
pub const P_ASPECT: u32 = 1 << 7;
pub const P_BASE_SIZE: u32 = 1 << 8;
pub const P_WIN_GRAVITY: u32 = 1 << 9;

/// `WM_HINTS` StateHint flag
pub const STATE_HINT: u32 = 1 << 1;

/// Size hints (XSizeHints equivalent). Fields not covered by `flags` are zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SizeHints {
    pub flags: u32,
    pub min_width: u32,
    pub min_height: u32,
    pub max_width: u32,
    pub max_height: u32,
    pub width_inc: u32,
    pub height_inc: u32,
    pub min_aspect_num: u32,
    pub min_aspect_den: u32,
    pub max_aspect_num: u32,
    pub max_aspect_den: u32,
    pub base_width: u32,
    pub base_height: u32,
    pub win_gravity: u32,
}

impl SizeHints {
    /// Parse the 32-bit values of a `WM_NORMAL_HINTS` property. Pre-ICCCM
    /// clients write 15 values (no base size or gravity).
    pub fn from_values(values: &[u32]) -> Option<Self> {
        if values.len() < 15 {
            return None;
        }
        let get = |i: usize| values.get(i).copied().unwrap_or(0);
        let flags = get(0);

        // Fields 1..=4 (position and size) are obsolete

        let mut hints = SizeHints {
            flags,
            min_width: get(5),
            min_height: get(6),
            max_width: get(7),
            max_height: get(8),
            width_inc: get(9),
            height_inc: get(10),
            min_aspect_num: get(11),
            min_aspect_den: get(12),
            max_aspect_num: get(13),
            max_aspect_den: get(14),
            base_width: get(15),
            base_height: get(16),
            win_gravity: get(17),
        };

        if flags & P_MIN_SIZE == 0 {
            hints.min_width = 0;
            hints.min_height = 0;
        }
        if flags & P_MAX_SIZE == 0 {
            hints.max_width = 0;
            hints.max_height = 0;
        }
        if flags & P_RESIZE_INC == 0 {
            hints.width_inc = 0;
            hints.height_inc = 0;
        }
        if flags & P_ASPECT == 0 {
            hints.min_aspect_num = 0;
            hints.min_aspect_den = 0;
            hints.max_aspect_num = 0;
            hints.max_aspect_den = 0;
        }
        if flags & P_BASE_SIZE == 0 {
            hints.base_width = 0;
            hints.base_height = 0;
        }
        if flags & P_WIN_GRAVITY == 0 {
            hints.win_gravity = 0;
        }

        Some(hints)
    }

    fn has(&self, flag: u32) -> bool {
        self.flags & flag != 0
    }

    /// Nearest size to `width` x `height` the client accepts, following the
    /// ICCCM rules for base size, aspect ratio, increments, minimum and maximum.
    pub fn constrain(&self, width: u32, height: u32) -> (u32, u32) {
        // Base size falls back to the minimum and vice versa
        let (base_w, base_h) = if self.has(P_BASE_SIZE) {
            (self.base_width, self.base_height)
        } else if self.has(P_MIN_SIZE) {
            (self.min_width, self.min_height)
        } else {
            (0, 0)
        };
        let (min_w, min_h) = if self.has(P_MIN_SIZE) {
            (self.min_width, self.min_height)
        } else {
            (base_w, base_h)
        };

        let mut w = width.saturating_sub(base_w) as u64;
        let mut h = height.saturating_sub(base_h) as u64;

        if self.has(P_ASPECT) {
            let (max_num, max_den) = (self.max_aspect_num as u64, self.max_aspect_den as u64);
            let (min_num, min_den) = (self.min_aspect_num as u64, self.min_aspect_den as u64);

            // w/h <= max_num/max_den
            if max_num > 0 && max_den > 0 && w * max_den > h * max_num {
                w = h * max_num / max_den;
            }
            // w/h >= min_num/min_den
            if min_num > 0 && min_den > 0 && w * min_den < h * min_num {
                h = w * min_den / min_num;
            }
        }

        if self.has(P_RESIZE_INC) {
            if self.width_inc > 0 {
                w -= w % self.width_inc as u64;
            }
            if self.height_inc > 0 {
                h -= h % self.height_inc as u64;
            }
        }

        let mut w = (w + base_w as u64).min(u32::MAX as u64) as u32;
        let mut h = (h + base_h as u64).min(u32::MAX as u64) as u32;

        w = w.max(min_w);
        h = h.max(min_h);

        if self.has(P_MAX_SIZE) {
            if self.max_width > 0 {
                w = w.min(self.max_width);
            }
            if self.max_height > 0 {
                h = h.min(self.max_height);
            }
        }

        (w, h)
    }
}

/// Whether `WM_HINTS` asks for the window to start iconic
pub fn wants_initial_iconic(values: &[u32]) -> bool {
    match (values.first(), values.get(2)) {
        (Some(flags), Some(initial_state)) => flags & STATE_HINT != 0 && *initial_state == 3,
        _ => false,
    }
}
