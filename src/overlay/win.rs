use std::{
    cell::RefCell,
    collections::VecDeque,
    sync::Once,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, error, instrument};
use windows::{
    core::{w, PCWSTR},
    Win32::{
        Foundation::{BOOL, COLORREF, HINSTANCE, HWND, LPARAM, LRESULT, RECT, WPARAM},
        Graphics::Gdi::{
            BeginPaint, CreateSolidBrush, DeleteObject, DrawTextW, EndPaint, FillRect,
            InvalidateRect, SetBkMode, SetTextColor, DT_CENTER, DT_WORDBREAK, HGDIOBJ,
            PAINTSTRUCT, TRANSPARENT,
        },
        System::LibraryLoader::GetModuleHandleW,
        UI::{
            Input::KeyboardAndMouse::{SetFocus, VK_ESCAPE, VK_F4, VK_LWIN, VK_RWIN, VK_TAB},
            WindowsAndMessaging::{
                CallNextHookEx, CreateWindowExW, DefWindowProcW, DestroyWindow, DispatchMessageW,
                GetClientRect, GetForegroundWindow, GetSystemMetrics, PeekMessageW,
                RegisterClassW, SetForegroundWindow, SetWindowPos, SetWindowsHookExW, ShowWindow,
                TranslateMessage, UnhookWindowsHookEx, HHOOK, HWND_TOPMOST, KBDLLHOOKSTRUCT,
                LLKHF_ALTDOWN, MSG, PM_REMOVE, SC_CLOSE, SC_MINIMIZE, SM_CXVIRTUALSCREEN,
                SM_CYVIRTUALSCREEN, SM_XVIRTUALSCREEN, SM_YVIRTUALSCREEN, SWP_NOMOVE,
                SWP_NOSIZE, SW_SHOW, WH_KEYBOARD_LL, WM_CHAR, WM_CLOSE, WM_PAINT, WM_SYSCOMMAND,
                WNDCLASSW, WS_EX_TOOLWINDOW, WS_EX_TOPMOST, WS_POPUP,
            },
        },
    },
};

use super::{
    surface::{LockSurface, OverlayView, SurfaceEvent, HEADLINE, INSTRUCTION},
    OverlayError,
};

const CLASS_NAME: PCWSTR = w!("NannybotLockOverlay");
const POLL_SLEEP: Duration = Duration::from_millis(10);
// COLORREF is 0x00BBGGRR.
const BACKGROUND: COLORREF = COLORREF(0x0011_11cc);
const FOREGROUND: COLORREF = COLORREF(0x00ff_ffff);

thread_local! {
    // The window procedure and the keyboard hook are plain callbacks, so they hand their results
    // over through thread locals. Both run on the thread that owns the surface.
    static EVENTS: RefCell<VecDeque<SurfaceEvent>> = const { RefCell::new(VecDeque::new()) };
    static TEXT: RefCell<Vec<u16>> = const { RefCell::new(Vec::new()) };
}

fn push_event(event: SurfaceEvent) {
    EVENTS.with_borrow_mut(|events| events.push_back(event));
}

fn translate_char(code: u32) -> Option<SurfaceEvent> {
    match code {
        0x0d => Some(SurfaceEvent::Submit),
        0x08 => Some(SurfaceEvent::Backspace),
        0x1b => Some(SurfaceEvent::Blocked),
        code => char::from_u32(code)
            .filter(|c| !c.is_control())
            .map(SurfaceEvent::Char),
    }
}

fn is_escape_key(vk_code: u32, alt: bool) -> bool {
    let vk = |key: windows::Win32::UI::Input::KeyboardAndMouse::VIRTUAL_KEY| key.0 as u32;
    vk_code == vk(VK_LWIN)
        || vk_code == vk(VK_RWIN)
        || (alt && (vk_code == vk(VK_TAB) || vk_code == vk(VK_F4) || vk_code == vk(VK_ESCAPE)))
}

unsafe extern "system" fn window_proc(
    hwnd: HWND,
    msg: u32,
    wparam: WPARAM,
    lparam: LPARAM,
) -> LRESULT {
    match msg {
        WM_CLOSE => {
            push_event(SurfaceEvent::Blocked);
            LRESULT(0)
        }
        WM_SYSCOMMAND if matches!((wparam.0 & 0xfff0) as u32, SC_CLOSE | SC_MINIMIZE) => {
            push_event(SurfaceEvent::Blocked);
            LRESULT(0)
        }
        WM_CHAR => {
            if let Some(event) = translate_char(wparam.0 as u32) {
                push_event(event);
            }
            LRESULT(0)
        }
        WM_PAINT => {
            unsafe { paint(hwnd) };
            LRESULT(0)
        }
        _ => unsafe { DefWindowProcW(hwnd, msg, wparam, lparam) },
    }
}

unsafe fn paint(hwnd: HWND) {
    unsafe {
        let mut ps = PAINTSTRUCT::default();
        let hdc = BeginPaint(hwnd, &mut ps);
        let mut rect = RECT::default();
        let _ = GetClientRect(hwnd, &mut rect);

        let brush = CreateSolidBrush(BACKGROUND);
        FillRect(hdc, &rect, brush);
        let _ = DeleteObject(HGDIOBJ(brush.0));

        SetTextColor(hdc, FOREGROUND);
        SetBkMode(hdc, TRANSPARENT);
        rect.top += (rect.bottom - rect.top) / 4;
        rect.left += (rect.right - rect.left) / 6;
        rect.right -= (rect.right - rect.left) / 5;
        TEXT.with_borrow_mut(|text| {
            if !text.is_empty() {
                DrawTextW(hdc, text, &mut rect, DT_CENTER | DT_WORDBREAK);
            }
        });
        let _ = EndPaint(hwnd, &ps);
    }
}

/// Blocks the system shortcuts that would otherwise switch away from the overlay.
unsafe extern "system" fn keyboard_hook(code: i32, wparam: WPARAM, lparam: LPARAM) -> LRESULT {
    if code >= 0 {
        let info = unsafe { &*(lparam.0 as *const KBDLLHOOKSTRUCT) };
        let alt = info.flags.0 & LLKHF_ALTDOWN.0 != 0;
        if is_escape_key(info.vkCode, alt) {
            push_event(SurfaceEvent::Blocked);
            return LRESULT(1);
        }
    }
    unsafe { CallNextHookEx(HHOOK::default(), code, wparam, lparam) }
}

/// Top-most popup covering every monitor, with a low level keyboard hook while it is up.
pub struct WindowsLockSurface {
    instance: HINSTANCE,
    window: Option<HWND>,
    hook: Option<HHOOK>,
}

impl WindowsLockSurface {
    pub fn new() -> Result<Self, OverlayError> {
        let module = unsafe { GetModuleHandleW(None) }
            .map_err(|e| OverlayError::Render(e.to_string()))?;
        let instance: HINSTANCE = module.into();

        static REGISTER_CLASS: Once = Once::new();
        REGISTER_CLASS.call_once(|| unsafe {
            let class = WNDCLASSW {
                hInstance: instance,
                lpszClassName: CLASS_NAME,
                lpfnWndProc: Some(window_proc),
                ..Default::default()
            };
            if RegisterClassW(&class) == 0 {
                error!("Failed to register the overlay window class");
            }
        });

        Ok(Self {
            instance,
            window: None,
            hook: None,
        })
    }

    fn keep_on_top(&self, window: HWND) {
        unsafe {
            if GetForegroundWindow() != window {
                debug!("Overlay lost the foreground, taking it back");
                let _ = SetWindowPos(window, HWND_TOPMOST, 0, 0, 0, 0, SWP_NOMOVE | SWP_NOSIZE);
                let _ = SetForegroundWindow(window);
                let _ = SetFocus(window);
            }
        }
    }
}

impl LockSurface for WindowsLockSurface {
    #[instrument(skip(self))]
    fn engage(&mut self) -> Result<(), OverlayError> {
        EVENTS.with_borrow_mut(|events| events.clear());
        let window = unsafe {
            CreateWindowExW(
                WS_EX_TOPMOST | WS_EX_TOOLWINDOW,
                CLASS_NAME,
                w!("nannybot"),
                WS_POPUP,
                GetSystemMetrics(SM_XVIRTUALSCREEN),
                GetSystemMetrics(SM_YVIRTUALSCREEN),
                GetSystemMetrics(SM_CXVIRTUALSCREEN),
                GetSystemMetrics(SM_CYVIRTUALSCREEN),
                None,
                None,
                self.instance,
                None,
            )
        }
        .map_err(|e| OverlayError::Render(e.to_string()))?;
        self.window = Some(window);

        let hook = unsafe { SetWindowsHookExW(WH_KEYBOARD_LL, Some(keyboard_hook), self.instance, 0) }
            .map_err(|e| OverlayError::Render(e.to_string()))?;
        self.hook = Some(hook);

        unsafe {
            let _ = ShowWindow(window, SW_SHOW);
        }
        self.keep_on_top(window);
        Ok(())
    }

    fn render(&mut self, view: &OverlayView<'_>) -> Result<(), OverlayError> {
        let text = format!(
            "{HEADLINE}\r\n\r\n{INSTRUCTION}\r\n\r\n{}\r\n\r\n> {}_\r\n\r\n{}",
            view.challenge,
            view.input,
            view.feedback.unwrap_or_default()
        );
        TEXT.with_borrow_mut(|buffer| *buffer = text.encode_utf16().collect());
        if let Some(window) = self.window {
            unsafe {
                let _ = InvalidateRect(window, None, BOOL::from(true));
            }
        }
        Ok(())
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<SurfaceEvent>, OverlayError> {
        let deadline = Instant::now() + timeout;
        loop {
            let mut msg = MSG::default();
            unsafe {
                while PeekMessageW(&mut msg, None, 0, 0, PM_REMOVE).as_bool() {
                    let _ = TranslateMessage(&msg);
                    DispatchMessageW(&msg);
                }
            }
            if let Some(event) = EVENTS.with_borrow_mut(|events| events.pop_front()) {
                return Ok(Some(event));
            }
            if let Some(window) = self.window {
                self.keep_on_top(window);
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            thread::sleep(POLL_SLEEP);
        }
    }

    fn release(&mut self) {
        if let Some(hook) = self.hook.take() {
            if let Err(e) = unsafe { UnhookWindowsHookEx(hook) } {
                error!("Failed to remove keyboard hook {e:?}");
            }
        }
        if let Some(window) = self.window.take() {
            if let Err(e) = unsafe { DestroyWindow(window) } {
                error!("Failed to destroy overlay window {e:?}");
            }
        }
        TEXT.with_borrow_mut(|text| text.clear());
    }
}

#[cfg(test)]
mod tests {
    use crate::overlay::surface::SurfaceEvent;

    use super::{is_escape_key, translate_char};

    #[test]
    fn characters() {
        assert_eq!(translate_char('a' as u32), Some(SurfaceEvent::Char('a')));
        assert_eq!(translate_char(0x0d), Some(SurfaceEvent::Submit));
        assert_eq!(translate_char(0x08), Some(SurfaceEvent::Backspace));
        assert_eq!(translate_char(0x17), None);
    }

    #[test]
    fn task_switching_is_blocked() {
        assert!(is_escape_key(0x09, true));
        assert!(is_escape_key(0x5b, false));
        assert!(!is_escape_key(0x09, false));
        assert!(!is_escape_key('A' as u32, true));
    }
}
