use crate::compositor::frame::Frame;
use crate::compositor::surface::{
    BackendKind, LayeredPresenter, NativeSurface, PresentMode, Surface, SurfaceFactory,
};
use crate::compositor::window::{LayeredAttributes, WindowAttributes};
use crate::error::{AttributeOp, CompositorError, Result};
use crate::settings::OverlaySettings;
use raw_window_handle::RawWindowHandle;
use std::mem;
use std::ptr;
use std::sync::Once;
use windows::core::PCWSTR;
use windows::Win32::Foundation::{
    GetLastError, SetLastError, COLORREF, ERROR_SUCCESS, HANDLE, HWND, LPARAM, LRESULT, POINT,
    RECT, SIZE, WIN32_ERROR, WPARAM,
};
use windows::Win32::Graphics::Gdi::{
    BeginPaint, BitBlt, CreateCompatibleDC, CreateDIBSection, DeleteDC, DeleteObject, EndPaint,
    GetDC, ReleaseDC, SelectObject, AC_SRC_ALPHA, AC_SRC_OVER, BITMAPINFO, BITMAPINFOHEADER,
    BI_RGB, BLENDFUNCTION, DIB_RGB_COLORS, HBITMAP, HDC, HGDIOBJ, PAINTSTRUCT, SRCCOPY,
};
use windows::Win32::System::LibraryLoader::GetModuleHandleW;
use windows::Win32::UI::WindowsAndMessaging::{
    CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW, GetClientRect,
    GetSystemMetrics, GetWindowLongPtrW, PeekMessageW, PostQuitMessage, RegisterClassW,
    SetLayeredWindowAttributes, SetWindowLongPtrW, SetWindowPos, ShowWindow, TranslateMessage,
    GWLP_USERDATA, GWL_EXSTYLE, HWND_NOTOPMOST, HWND_TOPMOST, LAYERED_WINDOW_ATTRIBUTES_FLAGS,
    MSG, PM_REMOVE, SM_CXSCREEN, SM_CYSCREEN, SWP_FRAMECHANGED, SWP_NOACTIVATE, SWP_NOMOVE,
    SWP_NOSIZE, SWP_NOZORDER, SW_SHOW, ULW_ALPHA, ULW_COLORKEY, ULW_OPAQUE, UpdateLayeredWindow,
    WINDOW_EX_STYLE, WINDOW_STYLE, WM_CLOSE, WM_ERASEBKGND, WM_PAINT, WM_QUIT, WNDCLASSW, WS_POPUP,
};

const WINDOW_CLASS_NAME: &str = "ChromaOverlayHost";

fn widestring(value: &str) -> Vec<u16> {
    use std::os::windows::ffi::OsStrExt;
    std::ffi::OsStr::new(value)
        .encode_wide()
        .chain(std::iter::once(0))
        .collect()
}

fn last_error_code() -> Option<u32> {
    let code = unsafe { GetLastError() };
    (code != ERROR_SUCCESS).then_some(code.0)
}

unsafe extern "system" fn host_wndproc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_ERASEBKGND => LRESULT(1),
        WM_PAINT => {
            let mut ps = PAINTSTRUCT::default();
            let hdc = unsafe { BeginPaint(hwnd, &mut ps) };
            if !hdc.0.is_null() {
                let mem_dc = HDC(unsafe { GetWindowLongPtrW(hwnd, GWLP_USERDATA) } as *mut _);
                if !mem_dc.0.is_null() {
                    let _ = unsafe {
                        BitBlt(
                            hdc,
                            ps.rcPaint.left,
                            ps.rcPaint.top,
                            ps.rcPaint.right - ps.rcPaint.left,
                            ps.rcPaint.bottom - ps.rcPaint.top,
                            mem_dc,
                            ps.rcPaint.left,
                            ps.rcPaint.top,
                            SRCCOPY,
                        )
                    };
                }
            }
            unsafe {
                let _ = EndPaint(hwnd, &ps);
            }
            LRESULT(0)
        }
        // The owner loop tears the compositor down before the window goes away.
        WM_CLOSE => {
            unsafe { PostQuitMessage(0) };
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}

/// Drains the thread's message queue. Returns `false` once a quit was posted.
pub fn pump_messages() -> bool {
    let mut keep_running = true;
    unsafe {
        let mut msg = MSG::default();
        while PeekMessageW(&mut msg, HWND::default(), 0, 0, PM_REMOVE).into() {
            if msg.message == WM_QUIT {
                keep_running = false;
                continue;
            }
            let _ = TranslateMessage(&msg);
            let _ = DispatchMessageW(&msg);
        }
    }
    keep_running
}

/// Borderless top-level window that hosts the overlay.
#[derive(Debug)]
pub struct HostWindow {
    hwnd: HWND,
}

impl HostWindow {
    pub fn create(settings: &OverlaySettings) -> anyhow::Result<Self> {
        static REGISTER_CLASS: Once = Once::new();
        let class_name = widestring(WINDOW_CLASS_NAME);
        let title = widestring("Chroma Overlay");
        let hinstance = unsafe { GetModuleHandleW(PCWSTR::null()) }?;

        REGISTER_CLASS.call_once(|| unsafe {
            let wc = WNDCLASSW {
                hInstance: hinstance.into(),
                lpszClassName: PCWSTR(class_name.as_ptr()),
                lpfnWndProc: Some(host_wndproc),
                ..Default::default()
            };
            let _ = RegisterClassW(&wc);
        });

        let (width, height) = settings.window_size();
        let (screen_w, screen_h) =
            unsafe { (GetSystemMetrics(SM_CXSCREEN), GetSystemMetrics(SM_CYSCREEN)) };
        let x = settings
            .window_x
            .unwrap_or((screen_w - width as i32) / 2);
        let y = settings
            .window_y
            .unwrap_or((screen_h - height as i32) / 2);

        let hwnd = unsafe {
            CreateWindowExW(
                WINDOW_EX_STYLE(0),
                PCWSTR(class_name.as_ptr()),
                PCWSTR(title.as_ptr()),
                WINDOW_STYLE(WS_POPUP.0),
                x,
                y,
                width as i32,
                height as i32,
                None,
                None,
                hinstance,
                None,
            )
        }?;
        unsafe {
            let _ = ShowWindow(hwnd, SW_SHOW);
        }
        tracing::info!(x, y, width, height, "overlay host window created");
        Ok(Self { hwnd })
    }

    pub fn hwnd(&self) -> HWND {
        self.hwnd
    }

    /// Current client area, or `None` when the window is gone or minimised.
    pub fn client_size(&self) -> Option<(u32, u32)> {
        let mut rect = RECT::default();
        unsafe { GetClientRect(self.hwnd, &mut rect) }.ok()?;
        let width = (rect.right - rect.left).max(0) as u32;
        let height = (rect.bottom - rect.top).max(0) as u32;
        (width > 0 && height > 0).then_some((width, height))
    }

    pub fn attributes(&self) -> Win32Attributes {
        Win32Attributes { hwnd: self.hwnd }
    }

    pub fn surface_factory(&self) -> Win32SurfaceFactory {
        Win32SurfaceFactory { hwnd: self.hwnd }
    }
}

impl Drop for HostWindow {
    fn drop(&mut self) {
        if !self.hwnd.0.is_null() {
            unsafe {
                let _ = DestroyWindow(self.hwnd);
            }
            self.hwnd = HWND::default();
        }
    }
}

/// Extended style and layered attributes of a live Win32 window.
#[derive(Debug, Clone, Copy)]
pub struct Win32Attributes {
    hwnd: HWND,
}

impl Win32Attributes {
    pub fn new(hwnd: HWND) -> Self {
        Self { hwnd }
    }

    /// Adopts a window created by another windowing library.
    pub fn from_raw_window_handle(handle: RawWindowHandle) -> Result<Self> {
        match handle {
            RawWindowHandle::Win32(handle) => Ok(Self {
                hwnd: HWND(handle.hwnd.get() as *mut _),
            }),
            other => Err(CompositorError::attribute(
                AttributeOp::ReadStyle,
                format!("not a Win32 window handle: {other:?}"),
            )),
        }
    }

    fn ensure_window(&self, op: AttributeOp) -> Result<()> {
        if self.hwnd.0.is_null() {
            return Err(CompositorError::attribute(op, "no window handle"));
        }
        Ok(())
    }
}

impl WindowAttributes for Win32Attributes {
    fn read_ex_style(&self) -> Result<u32> {
        self.ensure_window(AttributeOp::ReadStyle)?;
        let style = unsafe {
            SetLastError(WIN32_ERROR(0));
            GetWindowLongPtrW(self.hwnd, GWL_EXSTYLE)
        };
        if style == 0 {
            if let Some(code) = last_error_code() {
                return Err(CompositorError::attribute(
                    AttributeOp::ReadStyle,
                    format!("GetWindowLongPtrW failed with {code}"),
                ));
            }
        }
        Ok(style as u32)
    }

    fn write_ex_style(&mut self, style: u32) -> Result<()> {
        self.ensure_window(AttributeOp::WriteStyle)?;
        let previous = unsafe {
            SetLastError(WIN32_ERROR(0));
            SetWindowLongPtrW(self.hwnd, GWL_EXSTYLE, style as isize)
        };
        if previous == 0 {
            if let Some(code) = last_error_code() {
                return Err(CompositorError::attribute(
                    AttributeOp::WriteStyle,
                    format!("SetWindowLongPtrW failed with {code}"),
                ));
            }
        }
        unsafe {
            SetWindowPos(
                self.hwnd,
                HWND::default(),
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOZORDER | SWP_NOACTIVATE | SWP_FRAMECHANGED,
            )
        }
        .map_err(|err| CompositorError::attribute(AttributeOp::WriteStyle, err.to_string()))
    }

    fn set_layered_attributes(&mut self, attributes: LayeredAttributes) -> Result<()> {
        self.ensure_window(AttributeOp::LayeredAttributes)?;
        let raw = attributes.raw();
        unsafe {
            SetLayeredWindowAttributes(
                self.hwnd,
                COLORREF(raw.colorref),
                raw.alpha,
                LAYERED_WINDOW_ATTRIBUTES_FLAGS(raw.flags),
            )
        }
        .map_err(|err| CompositorError::attribute(AttributeOp::LayeredAttributes, err.to_string()))
    }

    fn set_top_most(&mut self, top_most: bool) -> Result<()> {
        self.ensure_window(AttributeOp::ZOrder)?;
        let insert_after = if top_most { HWND_TOPMOST } else { HWND_NOTOPMOST };
        unsafe {
            SetWindowPos(
                self.hwnd,
                insert_after,
                0,
                0,
                0,
                0,
                SWP_NOMOVE | SWP_NOSIZE | SWP_NOACTIVATE,
            )
        }
        .map_err(|err| CompositorError::attribute(AttributeOp::ZOrder, err.to_string()))
    }
}

/// Presents back-buffers through a 32-bit top-down DIB section.
#[derive(Debug)]
pub struct GdiPresenter {
    hwnd: HWND,
    mem_dc: HDC,
    dib: HBITMAP,
    old_bitmap: HGDIOBJ,
    bits: *mut u8,
    size: (u32, u32),
}

impl GdiPresenter {
    pub fn new(hwnd: HWND) -> Result<Self> {
        let mem_dc = unsafe { CreateCompatibleDC(HDC::default()) };
        if mem_dc.0.is_null() {
            return Err(CompositorError::backend(
                BackendKind::Native,
                "CreateCompatibleDC failed",
            ));
        }
        unsafe {
            let _ = SetWindowLongPtrW(hwnd, GWLP_USERDATA, mem_dc.0 as isize);
        }
        Ok(Self {
            hwnd,
            mem_dc,
            dib: HBITMAP::default(),
            old_bitmap: HGDIOBJ::default(),
            bits: ptr::null_mut(),
            size: (0, 0),
        })
    }

    /// Builds and selects the new DIB before the old one is deleted.
    fn ensure_dib(&mut self, width: u32, height: u32) -> Result<()> {
        if self.size == (width, height) && !self.bits.is_null() {
            return Ok(());
        }
        let mut bmi = BITMAPINFO::default();
        bmi.bmiHeader = BITMAPINFOHEADER {
            biSize: mem::size_of::<BITMAPINFOHEADER>() as u32,
            biWidth: width as i32,
            biHeight: -(height as i32),
            biPlanes: 1,
            biBitCount: 32,
            biCompression: BI_RGB.0,
            ..Default::default()
        };
        let mut bits: *mut core::ffi::c_void = ptr::null_mut();
        let dib = unsafe {
            CreateDIBSection(self.mem_dc, &bmi, DIB_RGB_COLORS, &mut bits, HANDLE::default(), 0)
        }
        .map_err(|err| CompositorError::Present(format!("CreateDIBSection failed: {err}")))?;
        if bits.is_null() {
            unsafe {
                let _ = DeleteObject(dib);
            }
            return Err(CompositorError::Present("DIB section has no pixel memory".into()));
        }

        let previous = unsafe { SelectObject(self.mem_dc, dib) };
        if self.dib.0.is_null() {
            self.old_bitmap = previous;
        } else {
            unsafe {
                let _ = DeleteObject(self.dib);
            }
        }
        self.dib = dib;
        self.bits = bits as *mut u8;
        self.size = (width, height);
        Ok(())
    }
}

impl LayeredPresenter for GdiPresenter {
    fn client_size(&self) -> (u32, u32) {
        let mut rect = RECT::default();
        if unsafe { GetClientRect(self.hwnd, &mut rect) }.is_err() {
            return self.size;
        }
        (
            (rect.right - rect.left).max(0) as u32,
            (rect.bottom - rect.top).max(0) as u32,
        )
    }

    fn present(&mut self, back_buffer: &Frame, mode: PresentMode) -> Result<()> {
        if self.mem_dc.0.is_null() {
            return Err(CompositorError::TornDown);
        }
        let (width, height) = back_buffer.size();
        if width == 0 || height == 0 {
            return Ok(());
        }
        self.ensure_dib(width, height)?;
        let bytes = back_buffer.as_bytes();
        unsafe {
            ptr::copy_nonoverlapping(bytes.as_ptr(), self.bits, bytes.len());
        }

        let (flags, key) = match mode {
            PresentMode::Blit => {
                let hdc = unsafe { GetDC(self.hwnd) };
                let result = unsafe {
                    BitBlt(
                        hdc,
                        0,
                        0,
                        width as i32,
                        height as i32,
                        self.mem_dc,
                        0,
                        0,
                        SRCCOPY,
                    )
                };
                unsafe {
                    let _ = ReleaseDC(self.hwnd, hdc);
                }
                return result.map_err(|err| CompositorError::Present(err.to_string()));
            }
            PresentMode::LayeredOpaque => (ULW_OPAQUE, COLORREF(0)),
            PresentMode::ColorKey(key) => (ULW_COLORKEY, COLORREF(key.to_colorref())),
            PresentMode::PerPixelAlpha => (ULW_ALPHA, COLORREF(0)),
        };

        let size = SIZE {
            cx: width as i32,
            cy: height as i32,
        };
        let src = POINT { x: 0, y: 0 };
        let blend = BLENDFUNCTION {
            BlendOp: AC_SRC_OVER as u8,
            SourceConstantAlpha: 255,
            AlphaFormat: AC_SRC_ALPHA as u8,
            ..Default::default()
        };
        unsafe {
            UpdateLayeredWindow(
                self.hwnd,
                HDC::default(),
                None,
                Some(&size),
                self.mem_dc,
                Some(&src),
                key,
                Some(&blend),
                flags,
            )
        }
        .map_err(|err| CompositorError::Present(format!("UpdateLayeredWindow failed: {err}")))
    }

    fn release(&mut self) {
        unsafe {
            if !self.mem_dc.0.is_null() && !self.dib.0.is_null() {
                let _ = SelectObject(self.mem_dc, self.old_bitmap);
            }
            if !self.dib.0.is_null() {
                let _ = DeleteObject(self.dib);
                self.dib = HBITMAP::default();
            }
            if !self.mem_dc.0.is_null() {
                let _ = SetWindowLongPtrW(self.hwnd, GWLP_USERDATA, 0);
                let _ = DeleteDC(self.mem_dc);
                self.mem_dc = HDC::default();
            }
        }
        self.bits = ptr::null_mut();
        self.size = (0, 0);
    }
}

impl Drop for GdiPresenter {
    fn drop(&mut self) {
        self.release();
    }
}

/// Creates Native surfaces for one host window. Embedded content needs a browser
/// host this build does not ship, so that request fails and the compositor falls
/// back to Native.
#[derive(Debug, Clone, Copy)]
pub struct Win32SurfaceFactory {
    hwnd: HWND,
}

impl SurfaceFactory for Win32SurfaceFactory {
    fn create(&mut self, kind: BackendKind, _settings: &OverlaySettings) -> Result<Surface> {
        match kind {
            BackendKind::Native => {
                let presenter = GdiPresenter::new(self.hwnd)?;
                Ok(Surface::Native(NativeSurface::new(Box::new(presenter))))
            }
            BackendKind::Embedded => Err(CompositorError::backend(
                kind,
                "no embedded content host is available",
            )),
        }
    }
}
