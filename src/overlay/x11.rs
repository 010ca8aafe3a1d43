use std::{
    fmt::Display,
    thread,
    time::{Duration, Instant},
};

use tracing::{debug, instrument, warn};
use xcb::{
    x::{self, Atom, Drawable, Font, Gcontext, KeyButMask, Keysym, Window},
    Connection, Xid,
};

use super::{
    surface::{wrap_text, LockSurface, OverlayView, SurfaceEvent, HEADLINE, INSTRUCTION},
    OverlayError,
};

/// Tried in order, "fixed" is available on every X server.
const FONTS: &[&[u8]] = &[
    b"-misc-fixed-bold-r-normal--18-120-100-100-c-90-iso8859-1",
    b"9x15bold",
    b"fixed",
];
const GRAB_ATTEMPTS: usize = 20;
const POLL_SLEEP: Duration = Duration::from_millis(10);
const WRAP_COLUMNS: usize = 70;
const LINE_HEIGHT: i16 = 26;

const XK_BACKSPACE: Keysym = 0xff08;
const XK_RETURN: Keysym = 0xff0d;
const XK_KP_ENTER: Keysym = 0xff8d;
const XK_ESCAPE: Keysym = 0xff1b;

fn backend(e: impl Display) -> OverlayError {
    OverlayError::Backend(e.to_string())
}

fn render_error(e: impl Display) -> OverlayError {
    OverlayError::Render(e.to_string())
}

fn intern_atom(conn: &Connection, name: &[u8]) -> Result<Atom, OverlayError> {
    let reply = conn
        .wait_for_reply(conn.send_request(&x::InternAtom {
            only_if_exists: false,
            name,
        }))
        .map_err(render_error)?;
    Ok(reply.atom())
}

/// Keyboard mapping of the server, used to turn key codes into keysyms.
struct KeyMap {
    min_keycode: u8,
    per_keycode: usize,
    keysyms: Vec<Keysym>,
}

impl KeyMap {
    fn load(conn: &Connection) -> Result<Self, OverlayError> {
        let setup = conn.get_setup();
        let (min_keycode, max_keycode) = (setup.min_keycode(), setup.max_keycode());
        let reply = conn
            .wait_for_reply(conn.send_request(&x::GetKeyboardMapping {
                first_keycode: min_keycode,
                count: max_keycode - min_keycode + 1,
            }))
            .map_err(render_error)?;
        Ok(Self {
            min_keycode,
            per_keycode: reply.keysyms_per_keycode() as usize,
            keysyms: reply.keysyms().to_vec(),
        })
    }

    fn keysym(&self, keycode: u8, shift: bool, caps_lock: bool) -> Keysym {
        let Some(offset) = keycode.checked_sub(self.min_keycode) else {
            return 0;
        };
        let row = offset as usize * self.per_keycode;
        let column = |index: usize| {
            (index < self.per_keycode)
                .then(|| self.keysyms.get(row + index).copied())
                .flatten()
                .unwrap_or(0)
        };

        let base = column(0);
        let sym = match column(1) {
            shifted if shift && shifted != 0 => shifted,
            _ => base,
        };

        match char::from_u32(sym) {
            Some(c) if caps_lock && c.is_ascii_alphabetic() => {
                if c.is_ascii_lowercase() {
                    c.to_ascii_uppercase() as Keysym
                } else {
                    c.to_ascii_lowercase() as Keysym
                }
            }
            _ => sym,
        }
    }
}

fn translate_key(keysym: Keysym, state: KeyButMask) -> Option<SurfaceEvent> {
    if state.intersects(KeyButMask::CONTROL | KeyButMask::MOD1 | KeyButMask::MOD4) {
        return Some(SurfaceEvent::Blocked);
    }
    match keysym {
        XK_RETURN | XK_KP_ENTER => Some(SurfaceEvent::Submit),
        XK_BACKSPACE => Some(SurfaceEvent::Backspace),
        XK_ESCAPE => Some(SurfaceEvent::Blocked),
        0x20..=0x7e | 0xa0..=0xff => char::from_u32(keysym).map(SurfaceEvent::Char),
        _ => None,
    }
}

/// Core fonts only know latin-1.
fn latin1(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| u8::try_from(c as u32).unwrap_or(b'?'))
        .take(255)
        .collect()
}

/// Override-redirect window over the whole root window. The window manager never sees it, so it
/// has no decorations and can't be closed, minimized or alt-tabbed away from. Keyboard and pointer
/// are grabbed while it is up.
pub struct X11LockSurface {
    connection: Connection,
    root: Window,
    width: u16,
    height: u16,
    background: u32,
    foreground: u32,
    window: Option<Window>,
    gc: Option<Gcontext>,
    font: Option<Font>,
    delete_atom: Atom,
    keymap: KeyMap,
    lines: Vec<String>,
}

impl X11LockSurface {
    pub fn new() -> Result<Self, OverlayError> {
        let (connection, preferred_screen) = Connection::connect(None).map_err(render_error)?;
        let setup = connection.get_setup();
        let screen = setup
            .roots()
            .nth(preferred_screen.max(0) as usize)
            .ok_or_else(|| OverlayError::Render("X server reported no screens".into()))?;
        let (root, width, height) = (
            screen.root(),
            screen.width_in_pixels(),
            screen.height_in_pixels(),
        );
        let foreground = screen.white_pixel();
        let background = connection
            .wait_for_reply(connection.send_request(&x::AllocColor {
                cmap: screen.default_colormap(),
                red: 0xcccc,
                green: 0x1111,
                blue: 0x1111,
            }))
            .map(|reply| reply.pixel())
            .unwrap_or_else(|e| {
                warn!("Couldn't allocate red, falling back to black {e:?}");
                screen.black_pixel()
            });

        let delete_atom = intern_atom(&connection, b"WM_DELETE_WINDOW")?;
        let keymap = KeyMap::load(&connection)?;

        Ok(Self {
            connection,
            root,
            width,
            height,
            background,
            foreground,
            window: None,
            gc: None,
            font: None,
            delete_atom,
            keymap,
            lines: Vec::new(),
        })
    }

    fn open_font(&self) -> Result<Font, OverlayError> {
        for name in FONTS {
            let font: Font = self.connection.generate_id();
            let cookie = self
                .connection
                .send_request_checked(&x::OpenFont { fid: font, name });
            match self.connection.check_request(cookie) {
                Ok(()) => return Ok(font),
                Err(e) => debug!("Font {} unavailable {e:?}", String::from_utf8_lossy(name)),
            }
        }
        Err(OverlayError::Render("no usable X font".into()))
    }

    fn grab_keyboard(&self, window: Window) -> Result<(), OverlayError> {
        // Another client (a menu, a drag) may hold the keyboard for a moment.
        for _ in 0..GRAB_ATTEMPTS {
            let reply = self
                .connection
                .wait_for_reply(self.connection.send_request(&x::GrabKeyboard {
                    owner_events: false,
                    grab_window: window,
                    time: x::CURRENT_TIME,
                    pointer_mode: x::GrabMode::Async,
                    keyboard_mode: x::GrabMode::Async,
                }))
                .map_err(render_error)?;
            if reply.status() == x::GrabStatus::Success {
                return Ok(());
            }
            thread::sleep(Duration::from_millis(50));
        }
        Err(OverlayError::Render("couldn't grab the keyboard".into()))
    }

    fn grab_pointer(&self, window: Window) {
        let reply = self
            .connection
            .wait_for_reply(self.connection.send_request(&x::GrabPointer {
                owner_events: false,
                grab_window: window,
                event_mask: x::EventMask::BUTTON_PRESS | x::EventMask::BUTTON_RELEASE,
                pointer_mode: x::GrabMode::Async,
                keyboard_mode: x::GrabMode::Async,
                confine_to: window,
                cursor: x::Cursor::none(),
                time: x::CURRENT_TIME,
            }));
        match reply {
            Ok(reply) if reply.status() == x::GrabStatus::Success => {}
            Ok(reply) => warn!("Pointer grab refused {:?}", reply.status()),
            Err(e) => warn!("Pointer grab failed {e:?}"),
        }
    }

    fn raise(&self, window: Window) {
        self.connection.send_request(&x::ConfigureWindow {
            window,
            value_list: &[x::ConfigWindow::StackMode(x::StackMode::Above)],
        });
        self.connection.send_request(&x::SetInputFocus {
            revert_to: x::InputFocus::PointerRoot,
            focus: window,
            time: x::CURRENT_TIME,
        });
    }

    fn draw(&self) -> Result<(), OverlayError> {
        let (Some(window), Some(gc)) = (self.window, self.gc) else {
            return Ok(());
        };
        self.connection.send_request(&x::ClearArea {
            exposures: false,
            window,
            x: 0,
            y: 0,
            width: 0,
            height: 0,
        });

        let total = self.lines.len() as i16 * LINE_HEIGHT;
        let mut y = (self.height as i16 - total).max(LINE_HEIGHT * 2) / 2;
        for line in &self.lines {
            let text = latin1(line);
            // Fixed fonts are about 9 pixels wide.
            let x = (self.width as i16 - text.len() as i16 * 9).max(0) / 2;
            self.connection.send_request(&x::ImageText8 {
                drawable: Drawable::Window(window),
                gc,
                x,
                y,
                string: &text,
            });
            y += LINE_HEIGHT;
        }
        self.connection.flush().map_err(backend)
    }
}

impl LockSurface for X11LockSurface {
    #[instrument(skip(self))]
    fn engage(&mut self) -> Result<(), OverlayError> {
        let window: Window = self.connection.generate_id();
        let cookie = self.connection.send_request_checked(&x::CreateWindow {
            depth: x::COPY_FROM_PARENT as u8,
            wid: window,
            parent: self.root,
            x: 0,
            y: 0,
            width: self.width,
            height: self.height,
            border_width: 0,
            class: x::WindowClass::InputOutput,
            visual: x::COPY_FROM_PARENT,
            value_list: &[
                x::Cw::BackPixel(self.background),
                x::Cw::OverrideRedirect(true),
                x::Cw::EventMask(
                    x::EventMask::EXPOSURE
                        | x::EventMask::KEY_PRESS
                        | x::EventMask::VISIBILITY_CHANGE,
                ),
            ],
        });
        self.connection.check_request(cookie).map_err(render_error)?;
        self.window = Some(window);

        self.connection.send_request(&x::ChangeProperty {
            mode: x::PropMode::Replace,
            window,
            property: x::ATOM_WM_NAME,
            r#type: x::ATOM_STRING,
            data: b"nannybot",
        });
        let protocols = intern_atom(&self.connection, b"WM_PROTOCOLS")?;
        self.connection.send_request(&x::ChangeProperty {
            mode: x::PropMode::Replace,
            window,
            property: protocols,
            r#type: x::ATOM_ATOM,
            data: &[self.delete_atom],
        });

        let font = self.open_font()?;
        self.font = Some(font);
        let gc: Gcontext = self.connection.generate_id();
        self.connection.send_request(&x::CreateGc {
            cid: gc,
            drawable: Drawable::Window(window),
            value_list: &[
                x::Gc::Foreground(self.foreground),
                x::Gc::Background(self.background),
                x::Gc::Font(font),
            ],
        });
        self.gc = Some(gc);

        self.connection.send_request(&x::MapWindow { window });
        self.raise(window);
        self.connection.flush().map_err(render_error)?;

        self.grab_keyboard(window)?;
        self.grab_pointer(window);
        debug!("Overlay window {:?} engaged", window);
        Ok(())
    }

    fn render(&mut self, view: &OverlayView<'_>) -> Result<(), OverlayError> {
        let mut lines = vec![HEADLINE.to_string(), String::new(), INSTRUCTION.to_string()];
        lines.push(String::new());
        lines.extend(wrap_text(view.challenge, WRAP_COLUMNS));
        lines.push(String::new());
        lines.extend(
            wrap_text(&format!("> {}_", view.input), WRAP_COLUMNS)
                .into_iter()
                .map(|line| format!("{line:<width$}", width = WRAP_COLUMNS)),
        );
        lines.push(String::new());
        lines.push(view.feedback.unwrap_or_default().to_string());
        self.lines = lines;
        self.draw()
    }

    fn next_event(&mut self, timeout: Duration) -> Result<Option<SurfaceEvent>, OverlayError> {
        let deadline = Instant::now() + timeout;
        loop {
            let event = self.connection.poll_for_event().map_err(backend)?;
            let translated = match event {
                Some(xcb::Event::X(x::Event::KeyPress(ev))) => {
                    let state = ev.state();
                    let keysym = self.keymap.keysym(
                        ev.detail(),
                        state.contains(KeyButMask::SHIFT),
                        state.contains(KeyButMask::LOCK),
                    );
                    translate_key(keysym, state)
                }
                Some(xcb::Event::X(x::Event::Expose(_))) => {
                    self.draw()?;
                    None
                }
                Some(xcb::Event::X(x::Event::VisibilityNotify(ev))) => {
                    if ev.state() != x::Visibility::Unobscured {
                        if let Some(window) = self.window {
                            debug!("Overlay got covered, raising it again");
                            self.raise(window);
                            self.connection.flush().map_err(backend)?;
                        }
                    }
                    None
                }
                Some(xcb::Event::X(x::Event::ClientMessage(ev))) => match ev.data() {
                    x::ClientMessageData::Data32([atom, ..])
                        if atom == self.delete_atom.resource_id() =>
                    {
                        Some(SurfaceEvent::Blocked)
                    }
                    _ => None,
                },
                Some(_) => None,
                None => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    thread::sleep(POLL_SLEEP);
                    continue;
                }
            };
            if translated.is_some() {
                return Ok(translated);
            }
        }
    }

    fn release(&mut self) {
        self.connection.send_request(&x::UngrabKeyboard {
            time: x::CURRENT_TIME,
        });
        self.connection.send_request(&x::UngrabPointer {
            time: x::CURRENT_TIME,
        });
        if let Some(gc) = self.gc.take() {
            self.connection.send_request(&x::FreeGc { gc });
        }
        if let Some(font) = self.font.take() {
            self.connection.send_request(&x::CloseFont { font });
        }
        if let Some(window) = self.window.take() {
            self.connection.send_request(&x::DestroyWindow { window });
        }
        if let Err(e) = self.connection.flush() {
            warn!("Couldn't flush overlay release {e:?}");
        }
    }
}

#[cfg(test)]
mod tests {
    use xcb::x::KeyButMask;

    use crate::overlay::surface::SurfaceEvent;

    use super::{latin1, translate_key, KeyMap, XK_RETURN};

    fn keymap() -> KeyMap {
        // keycode 10: a/A, keycode 11: 1/!, keycode 12: Return
        KeyMap {
            min_keycode: 10,
            per_keycode: 2,
            keysyms: vec![0x61, 0x41, 0x31, 0x21, XK_RETURN, 0],
        }
    }

    #[test]
    fn shift_and_caps_lock() {
        let map = keymap();
        assert_eq!(map.keysym(10, false, false), 'a' as u32);
        assert_eq!(map.keysym(10, true, false), 'A' as u32);
        assert_eq!(map.keysym(10, false, true), 'A' as u32);
        assert_eq!(map.keysym(10, true, true), 'a' as u32);
        assert_eq!(map.keysym(11, true, true), '!' as u32);
        assert_eq!(map.keysym(12, true, false), XK_RETURN);
        assert_eq!(map.keysym(3, false, false), 0);
    }

    #[test]
    fn key_translation() {
        let none = KeyButMask::empty();
        assert_eq!(translate_key('a' as u32, none), Some(SurfaceEvent::Char('a')));
        assert_eq!(translate_key(XK_RETURN, none), Some(SurfaceEvent::Submit));
        assert_eq!(translate_key(0xffe1, none), None);
        assert_eq!(
            translate_key('w' as u32, KeyButMask::CONTROL),
            Some(SurfaceEvent::Blocked)
        );
    }

    #[test]
    fn text_is_latin1() {
        assert_eq!(latin1("caf\u{e9} \u{2014}"), vec![b'c', b'a', b'f', 0xe9, b' ', b'?']);
    }
}
