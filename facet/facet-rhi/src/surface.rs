//! Surface targets: where a device's swap chain presents.

use raw_window_handle::{RawDisplayHandle, RawWindowHandle};

use crate::{Result, RhiError, TextureFormat};

/// What a device's surface presents to. Consumed once at device construction.
#[derive(Debug, Clone, Copy)]
pub enum SurfaceTarget {
    /// A native window. The window must outlive the device.
    Window {
        window: RawWindowHandle,
        display: RawDisplayHandle,
        width: u32,
        height: u32,
    },
    /// Offscreen swap chain; drawables are ordinary textures the caller can read back.
    Headless {
        width: u32,
        height: u32,
        format: TextureFormat,
    },
}

impl SurfaceTarget {
    pub fn extent(&self) -> (u32, u32) {
        match *self {
            SurfaceTarget::Window { width, height, .. } => (width, height),
            SurfaceTarget::Headless { width, height, .. } => (width, height),
        }
    }
}

/// Windowing system a [`RawWindowHandle`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WindowPlatform {
    Xlib,
    Xcb,
    Wayland,
    Win32,
    AppKit,
    UiKit,
}

impl WindowPlatform {
    /// Classify a window handle; handles from any other windowing system are rejected.
    pub fn of(handle: &RawWindowHandle) -> Result<Self> {
        match handle {
            RawWindowHandle::Xlib(_) => Ok(WindowPlatform::Xlib),
            RawWindowHandle::Xcb(_) => Ok(WindowPlatform::Xcb),
            RawWindowHandle::Wayland(_) => Ok(WindowPlatform::Wayland),
            RawWindowHandle::Win32(_) => Ok(WindowPlatform::Win32),
            RawWindowHandle::AppKit(_) => Ok(WindowPlatform::AppKit),
            RawWindowHandle::UiKit(_) => Ok(WindowPlatform::UiKit),
            other => Err(RhiError::UnsupportedPlatform(format!(
                "no recognized windowing backend for {:?}",
                other
            ))),
        }
    }

    /// True when the platform presents through a `CAMetalLayer`.
    pub fn is_apple(self) -> bool {
        matches!(self, WindowPlatform::AppKit | WindowPlatform::UiKit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use raw_window_handle::{WaylandWindowHandle, WebWindowHandle, XlibWindowHandle};
    use std::ptr::NonNull;

    #[test]
    fn classifies_known_handles() {
        let xlib = RawWindowHandle::Xlib(XlibWindowHandle::new(42));
        assert_eq!(WindowPlatform::of(&xlib), Ok(WindowPlatform::Xlib));

        let mut dummy = 0u8;
        let surface = NonNull::from(&mut dummy).cast();
        let wayland = RawWindowHandle::Wayland(WaylandWindowHandle::new(surface));
        assert_eq!(WindowPlatform::of(&wayland), Ok(WindowPlatform::Wayland));
        assert!(!WindowPlatform::Wayland.is_apple());
        assert!(WindowPlatform::AppKit.is_apple());
    }

    #[test]
    fn rejects_unknown_platform() {
        let web = RawWindowHandle::Web(WebWindowHandle::new(1));
        assert!(matches!(
            WindowPlatform::of(&web),
            Err(RhiError::UnsupportedPlatform(_))
        ));
    }

    #[test]
    fn headless_extent() {
        let target = SurfaceTarget::Headless {
            width: 64,
            height: 32,
            format: TextureFormat::Bgra8Unorm,
        };
        assert_eq!(target.extent(), (64, 32));
    }
}
