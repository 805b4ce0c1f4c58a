//! x11rb adapter: [`XProtocol`] over `RustConnection`.
//!
//! Owns the socket, caches per-window graphics contexts and the cursor
//! font, and keeps a stash of events read while waiting for a selection
//! reply so that the event pump still sees them in order.

use std::collections::{HashMap, VecDeque};
use std::os::fd::{AsRawFd, RawFd};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use x11rb::connection::{Connection, RequestConnection};
use x11rb::protocol::Event;
use x11rb::protocol::randr;
use x11rb::protocol::shm;
use x11rb::protocol::xinput;
use x11rb::protocol::xproto::{
    self, Blanking, ChangeWindowAttributesAux, ClientMessageEvent, ColormapAlloc,
    ConfigureWindowAux, CreateGCAux, CreateWindowAux, EventMask, Exposures, Gcontext, ImageFormat,
    ImageOrder, InputFocus, MapState, PropMode, SelectionNotifyEvent, StackMode, VisualClass,
    WindowClass,
};
use x11rb::rust_connection::RustConnection;

use super::{
    Atom, ClientMessage, Colormap, Cursor, CursorBitmap, Extension, Geometry, KeyboardMapping,
    ModifierMapping, MonitorInfo, NONE, NewWindow, Pixmap, PointerInfo, RawProperty, ScreenInfo,
    SelectionNotify, ShmBlit, Stacking, Timestamp, TreeInfo, VisualInfo, Window,
    WindowAttributes, WindowChanges, XError, XProtocol,
};

/// `XIAllMasterDevices`.
const XI_ALL_MASTER_DEVICES: u16 = 1;

/// Sleep between polls while waiting for a selection reply.
const SELECTION_POLL_INTERVAL: Duration = Duration::from_millis(5);

/// Production display connection.
pub struct X11Connection {
    conn: RustConnection,
    screen: ScreenInfo,
    shm: bool,
    xinput: bool,
    randr: bool,
    cursor_font: Mutex<Option<u32>>,
    gcs: Mutex<HashMap<Window, Gcontext>>,
    stash: Mutex<VecDeque<Event>>,
}

impl X11Connection {
    /// Connect to `display` (or `$DISPLAY`) and probe extensions.
    pub fn connect(display: Option<&str>) -> Result<Self, XError> {
        let (conn, screen_num) = RustConnection::connect(display)?;

        let setup_screen = &conn.setup().roots[screen_num];
        let visuals = setup_screen
            .allowed_depths
            .iter()
            .flat_map(|depth| {
                depth.visuals.iter().map(move |v| VisualInfo {
                    id: v.visual_id,
                    depth: depth.depth,
                    true_colour: v.class == VisualClass::TRUE_COLOR,
                    red_mask: v.red_mask,
                    green_mask: v.green_mask,
                    blue_mask: v.blue_mask,
                })
            })
            .collect();

        let screen = ScreenInfo {
            screen_num,
            root: setup_screen.root,
            width: setup_screen.width_in_pixels,
            height: setup_screen.height_in_pixels,
            width_mm: setup_screen.width_in_millimeters,
            height_mm: setup_screen.height_in_millimeters,
            root_depth: setup_screen.root_depth,
            root_visual: setup_screen.root_visual,
            default_colormap: setup_screen.default_colormap,
            visuals,
        };

        let shm = conn
            .extension_information(shm::X11_EXTENSION_NAME)?
            .is_some();
        let randr = conn
            .extension_information(randr::X11_EXTENSION_NAME)?
            .is_some();
        let xinput = conn
            .extension_information(xinput::X11_EXTENSION_NAME)?
            .is_some()
            && xinput::xi_query_version(&conn, 2, 2)?
                .reply()
                .map(|r| (r.major_version, r.minor_version) >= (2, 2))
                .unwrap_or(false);

        tracing::debug!(screen = screen_num, shm, xinput, randr, "X11 connection established");

        Ok(Self {
            conn,
            screen,
            shm,
            xinput,
            randr,
            cursor_font: Mutex::new(None),
            gcs: Mutex::new(HashMap::new()),
            stash: Mutex::new(VecDeque::new()),
        })
    }

    fn cursor_font(&self) -> Result<u32, XError> {
        let mut font = self.cursor_font.lock().map_err(|_| XError::LockPoisoned)?;
        if let Some(id) = *font {
            return Ok(id);
        }
        let id = self.conn.generate_id()?;
        xproto::open_font(&self.conn, id, b"cursor")?;
        *font = Some(id);
        Ok(id)
    }

    fn gc_for(&self, drawable: Window) -> Result<Gcontext, XError> {
        let mut gcs = self.gcs.lock().map_err(|_| XError::LockPoisoned)?;
        if let Some(&gc) = gcs.get(&drawable) {
            return Ok(gc);
        }
        let gc = self.conn.generate_id()?;
        xproto::create_gc(&self.conn, gc, drawable, &CreateGCAux::new())?;
        gcs.insert(drawable, gc);
        Ok(gc)
    }

    /// Upload a ZPixmap in horizontal strips that fit the request limit.
    #[allow(clippy::too_many_arguments)]
    fn put_strips(
        &self,
        drawable: u32,
        gc: Gcontext,
        depth: u8,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
        data: &[u8],
    ) -> Result<(), XError> {
        let stride = usize::from(width) * 4;
        if stride == 0 || height == 0 {
            return Ok(());
        }
        let max_bytes = self.conn.maximum_request_bytes().saturating_sub(32);
        let rows_per_strip = (max_bytes / stride).clamp(1, usize::from(height));

        let mut row = 0usize;
        while row < usize::from(height) {
            let rows = rows_per_strip.min(usize::from(height) - row);
            let start = row * stride;
            let Some(strip) = data.get(start..start + rows * stride) else {
                break;
            };
            xproto::put_image(
                &self.conn,
                ImageFormat::Z_PIXMAP,
                drawable,
                gc,
                width,
                rows as u16,
                x,
                y + row as i16,
                0,
                depth,
                strip,
            )?;
            row += rows;
        }
        Ok(())
    }

    fn create_bitmap(&self, width: u16, height: u16, bits: &[u8]) -> Result<Pixmap, XError> {
        let msb_first = self.conn.setup().bitmap_format_bit_order == ImageOrder::MSB_FIRST;
        let data: Vec<u8> = if msb_first {
            bits.iter().map(|b| b.reverse_bits()).collect()
        } else {
            bits.to_vec()
        };

        let pixmap = self.conn.generate_id()?;
        xproto::create_pixmap(&self.conn, 1, pixmap, self.screen.root, width, height)?;
        let gc = self.conn.generate_id()?;
        xproto::create_gc(
            &self.conn,
            gc,
            pixmap,
            &CreateGCAux::new().foreground(1).background(0),
        )?;
        xproto::put_image(
            &self.conn,
            ImageFormat::XY_PIXMAP,
            pixmap,
            gc,
            width,
            height,
            0,
            0,
            0,
            1,
            &data,
        )?;
        xproto::free_gc(&self.conn, gc)?;
        Ok(pixmap)
    }
}

impl XProtocol for X11Connection {
    fn screen(&self) -> &ScreenInfo {
        &self.screen
    }

    fn has_extension(&self, ext: Extension) -> bool {
        match ext {
            Extension::Shm => self.shm,
            Extension::XInput => self.xinput,
            Extension::RandR => self.randr,
        }
    }

    fn flush(&self) -> Result<(), XError> {
        self.conn.flush()?;
        Ok(())
    }

    fn intern_atom(&self, name: &str, only_if_exists: bool) -> Result<Atom, XError> {
        Ok(
            xproto::intern_atom(&self.conn, only_if_exists, name.as_bytes())?
                .reply()?
                .atom,
        )
    }

    fn atom_name(&self, atom: Atom) -> Result<String, XError> {
        let reply = xproto::get_atom_name(&self.conn, atom)?.reply()?;
        Ok(String::from_utf8_lossy(&reply.name).into_owned())
    }

    fn get_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        long_offset: u32,
        long_length: u32,
        delete: bool,
    ) -> Result<RawProperty, XError> {
        let reply = xproto::get_property(
            &self.conn,
            delete,
            window,
            property,
            type_,
            long_offset,
            long_length,
        )?
        .reply()?;
        Ok(RawProperty {
            type_: reply.type_,
            format: reply.format,
            bytes_after: reply.bytes_after,
            value: reply.value,
        })
    }

    fn change_property(
        &self,
        window: Window,
        property: Atom,
        type_: Atom,
        format: u8,
        data: &[u8],
    ) -> Result<(), XError> {
        let unit = usize::from(format / 8).max(1);
        xproto::change_property(
            &self.conn,
            PropMode::REPLACE,
            window,
            property,
            type_,
            format,
            (data.len() / unit) as u32,
            data,
        )?;
        Ok(())
    }

    fn delete_property(&self, window: Window, property: Atom) -> Result<(), XError> {
        xproto::delete_property(&self.conn, window, property)?;
        Ok(())
    }

    fn create_colormap(&self, visual: u32) -> Result<Colormap, XError> {
        let id = self.conn.generate_id()?;
        xproto::create_colormap(&self.conn, ColormapAlloc::NONE, id, self.screen.root, visual)?;
        Ok(id)
    }

    fn free_colormap(&self, colormap: Colormap) -> Result<(), XError> {
        xproto::free_colormap(&self.conn, colormap)?;
        Ok(())
    }

    fn create_window(&self, params: &NewWindow) -> Result<Window, XError> {
        let window = self.conn.generate_id()?;
        let mut aux = CreateWindowAux::new()
            .event_mask(EventMask::from(params.event_mask))
            .override_redirect(u32::from(params.override_redirect));
        let (class, depth, visual) = if params.input_only {
            (WindowClass::INPUT_ONLY, 0, 0)
        } else {
            aux = aux.border_pixel(0).background_pixel(0);
            if params.colormap != NONE {
                aux = aux.colormap(params.colormap);
            }
            (WindowClass::INPUT_OUTPUT, params.depth, params.visual)
        };

        xproto::create_window(
            &self.conn,
            depth,
            window,
            params.parent,
            params.x,
            params.y,
            params.width.max(1),
            params.height.max(1),
            0,
            class,
            visual,
            &aux,
        )?;
        Ok(window)
    }

    fn destroy_window(&self, window: Window) -> Result<(), XError> {
        let gc = self
            .gcs
            .lock()
            .map_err(|_| XError::LockPoisoned)?
            .remove(&window);
        if let Some(gc) = gc {
            xproto::free_gc(&self.conn, gc)?;
        }
        xproto::destroy_window(&self.conn, window)?;
        Ok(())
    }

    fn map_window(&self, window: Window) -> Result<(), XError> {
        xproto::map_window(&self.conn, window)?;
        Ok(())
    }

    fn unmap_window(&self, window: Window) -> Result<(), XError> {
        xproto::unmap_window(&self.conn, window)?;
        Ok(())
    }

    fn configure_window(&self, window: Window, changes: &WindowChanges) -> Result<(), XError> {
        let mut aux = ConfigureWindowAux::new();
        if let Some(x) = changes.x {
            aux = aux.x(x);
        }
        if let Some(y) = changes.y {
            aux = aux.y(y);
        }
        if let Some(width) = changes.width {
            aux = aux.width(width.max(1));
        }
        if let Some(height) = changes.height {
            aux = aux.height(height.max(1));
        }
        match changes.stacking {
            Some(Stacking::Above) => aux = aux.stack_mode(StackMode::ABOVE),
            Some(Stacking::Below(sibling)) => {
                aux = aux.sibling(sibling).stack_mode(StackMode::BELOW);
            }
            None => {}
        }
        xproto::configure_window(&self.conn, window, &aux)?;
        Ok(())
    }

    fn select_input(&self, window: Window, event_mask: u32) -> Result<(), XError> {
        xproto::change_window_attributes(
            &self.conn,
            window,
            &ChangeWindowAttributesAux::new().event_mask(EventMask::from(event_mask)),
        )?;
        Ok(())
    }

    fn window_attributes(&self, window: Window) -> Result<WindowAttributes, XError> {
        let reply = xproto::get_window_attributes(&self.conn, window)?.reply()?;
        Ok(WindowAttributes {
            viewable: reply.map_state == MapState::VIEWABLE,
            override_redirect: reply.override_redirect,
        })
    }

    fn geometry(&self, window: Window) -> Result<Geometry, XError> {
        let reply = xproto::get_geometry(&self.conn, window)?.reply()?;
        Ok(Geometry {
            x: i32::from(reply.x),
            y: i32::from(reply.y),
            width: u32::from(reply.width),
            height: u32::from(reply.height),
            border_width: u32::from(reply.border_width),
        })
    }

    fn query_tree(&self, window: Window) -> Result<TreeInfo, XError> {
        let reply = xproto::query_tree(&self.conn, window)?.reply()?;
        Ok(TreeInfo {
            root: reply.root,
            parent: reply.parent,
            children: reply.children,
        })
    }

    fn translate_coordinates(
        &self,
        src: Window,
        dst: Window,
        x: i32,
        y: i32,
    ) -> Result<(i32, i32, Window), XError> {
        let reply =
            xproto::translate_coordinates(&self.conn, src, dst, x as i16, y as i16)?.reply()?;
        Ok((i32::from(reply.dst_x), i32::from(reply.dst_y), reply.child))
    }

    fn query_pointer(&self, window: Window) -> Result<PointerInfo, XError> {
        let reply = xproto::query_pointer(&self.conn, window)?.reply()?;
        Ok(PointerInfo {
            root_x: i32::from(reply.root_x),
            root_y: i32::from(reply.root_y),
            child: reply.child,
            win_x: i32::from(reply.win_x),
            win_y: i32::from(reply.win_y),
            mask: u16::from(reply.mask),
        })
    }

    fn warp_pointer(&self, dst: Window, x: i32, y: i32) -> Result<(), XError> {
        xproto::warp_pointer(&self.conn, NONE, dst, 0, 0, 0, 0, x as i16, y as i16)?;
        Ok(())
    }

    fn set_input_focus(&self, window: Window, time: Timestamp) -> Result<(), XError> {
        xproto::set_input_focus(&self.conn, InputFocus::PARENT, window, time)?;
        Ok(())
    }

    fn input_focus(&self) -> Result<Window, XError> {
        Ok(xproto::get_input_focus(&self.conn)?.reply()?.focus)
    }

    fn send_client_message(
        &self,
        destination: Window,
        event_mask: u32,
        message: &ClientMessage,
    ) -> Result<(), XError> {
        let event = ClientMessageEvent::new(32, message.window, message.type_, message.data);
        xproto::send_event(
            &self.conn,
            false,
            destination,
            EventMask::from(event_mask),
            event,
        )?;
        Ok(())
    }

    fn send_selection_notify(&self, notify: &SelectionNotify) -> Result<(), XError> {
        let event = SelectionNotifyEvent {
            response_type: xproto::SELECTION_NOTIFY_EVENT,
            sequence: 0,
            time: notify.time,
            requestor: notify.requestor,
            selection: notify.selection,
            target: notify.target,
            property: notify.property,
        };
        xproto::send_event(&self.conn, false, notify.requestor, EventMask::NO_EVENT, event)?;
        Ok(())
    }

    fn set_selection_owner(
        &self,
        selection: Atom,
        owner: Window,
        time: Timestamp,
    ) -> Result<(), XError> {
        xproto::set_selection_owner(&self.conn, owner, selection, time)?;
        Ok(())
    }

    fn selection_owner(&self, selection: Atom) -> Result<Window, XError> {
        Ok(xproto::get_selection_owner(&self.conn, selection)?
            .reply()?
            .owner)
    }

    fn convert_selection(
        &self,
        requestor: Window,
        selection: Atom,
        target: Atom,
        property: Atom,
        time: Timestamp,
    ) -> Result<(), XError> {
        xproto::convert_selection(&self.conn, requestor, selection, target, property, time)?;
        Ok(())
    }

    fn wait_for_selection_notify(
        &self,
        requestor: Window,
        timeout: Duration,
    ) -> Result<Option<SelectionNotify>, XError> {
        let deadline = Instant::now() + timeout;
        self.conn.flush()?;

        loop {
            match self.conn.poll_for_event()? {
                Some(Event::SelectionNotify(e)) if e.requestor == requestor => {
                    return Ok(Some(SelectionNotify {
                        time: e.time,
                        requestor: e.requestor,
                        selection: e.selection,
                        target: e.target,
                        property: e.property,
                    }));
                }
                Some(other) => {
                    self.stash
                        .lock()
                        .map_err(|_| XError::LockPoisoned)?
                        .push_back(other);
                }
                None => {
                    if Instant::now() >= deadline {
                        return Ok(None);
                    }
                    std::thread::sleep(SELECTION_POLL_INTERVAL);
                }
            }
        }
    }

    fn create_font_cursor(&self, glyph: u16) -> Result<Cursor, XError> {
        let font = self.cursor_font()?;
        let cursor = self.conn.generate_id()?;
        xproto::create_glyph_cursor(
            &self.conn,
            cursor,
            font,
            font,
            glyph,
            glyph + 1,
            0,
            0,
            0,
            0xffff,
            0xffff,
            0xffff,
        )?;
        Ok(cursor)
    }

    fn create_bitmap_cursor(&self, bitmap: &CursorBitmap) -> Result<Cursor, XError> {
        let source = self.create_bitmap(bitmap.width, bitmap.height, &bitmap.source)?;
        let mask = self.create_bitmap(bitmap.width, bitmap.height, &bitmap.mask)?;
        let cursor = self.conn.generate_id()?;
        xproto::create_cursor(
            &self.conn,
            cursor,
            source,
            mask,
            0,
            0,
            0,
            0xffff,
            0xffff,
            0xffff,
            bitmap.hotspot_x,
            bitmap.hotspot_y,
        )?;
        xproto::free_pixmap(&self.conn, source)?;
        xproto::free_pixmap(&self.conn, mask)?;
        Ok(cursor)
    }

    fn free_cursor(&self, cursor: Cursor) -> Result<(), XError> {
        xproto::free_cursor(&self.conn, cursor)?;
        Ok(())
    }

    fn define_cursor(&self, window: Window, cursor: Cursor) -> Result<(), XError> {
        xproto::change_window_attributes(
            &self.conn,
            window,
            &ChangeWindowAttributesAux::new().cursor(cursor),
        )?;
        Ok(())
    }

    fn create_pixmap(
        &self,
        depth: u8,
        width: u16,
        height: u16,
        data: &[u8],
    ) -> Result<Pixmap, XError> {
        let pixmap = self.conn.generate_id()?;
        xproto::create_pixmap(&self.conn, depth, pixmap, self.screen.root, width, height)?;
        let gc = self.conn.generate_id()?;
        xproto::create_gc(&self.conn, gc, pixmap, &CreateGCAux::new())?;
        self.put_strips(pixmap, gc, depth, 0, 0, width, height, data)?;
        xproto::free_gc(&self.conn, gc)?;
        Ok(pixmap)
    }

    fn free_pixmap(&self, pixmap: Pixmap) -> Result<(), XError> {
        xproto::free_pixmap(&self.conn, pixmap)?;
        Ok(())
    }

    fn put_image(
        &self,
        window: Window,
        depth: u8,
        x: i16,
        y: i16,
        width: u16,
        height: u16,
        data: &[u8],
    ) -> Result<(), XError> {
        let gc = self.gc_for(window)?;
        self.put_strips(window, gc, depth, x, y, width, height, data)
    }

    fn shm_put_image(&self, window: Window, blit: &ShmBlit) -> Result<(), XError> {
        if !self.shm {
            return Err(XError::MissingExtension(shm::X11_EXTENSION_NAME));
        }
        let gc = self.gc_for(window)?;
        shm::put_image(
            &self.conn,
            window,
            gc,
            blit.total_width,
            blit.total_height,
            blit.src_x,
            blit.src_y,
            blit.width,
            blit.height,
            blit.dst_x,
            blit.dst_y,
            blit.depth,
            ImageFormat::Z_PIXMAP.into(),
            true,
            blit.shmseg,
            blit.offset,
        )?;
        Ok(())
    }

    fn modifier_mapping(&self) -> Result<ModifierMapping, XError> {
        let reply = xproto::get_modifier_mapping(&self.conn)?.reply()?;
        Ok(ModifierMapping {
            keycodes_per_modifier: usize::from(reply.keycodes_per_modifier()),
            keycodes: reply.keycodes,
        })
    }

    fn keyboard_mapping(&self) -> Result<KeyboardMapping, XError> {
        let setup = self.conn.setup();
        let min_keycode = setup.min_keycode;
        let count = setup.max_keycode - min_keycode + 1;
        let reply = xproto::get_keyboard_mapping(&self.conn, min_keycode, count)?.reply()?;
        Ok(KeyboardMapping {
            min_keycode,
            keysyms_per_keycode: usize::from(reply.keysyms_per_keycode),
            keysyms: reply.keysyms,
        })
    }

    fn pointer_mapping(&self) -> Result<Vec<u8>, XError> {
        Ok(xproto::get_pointer_mapping(&self.conn)?.reply()?.map)
    }

    fn query_keymap(&self) -> Result<[u8; 32], XError> {
        Ok(xproto::query_keymap(&self.conn)?.reply()?.keys)
    }

    fn set_screen_saver(&self, enabled: bool) -> Result<(), XError> {
        // -1 restores the server default timeout, 0 disables the saver.
        let timeout = if enabled { -1 } else { 0 };
        xproto::set_screen_saver(
            &self.conn,
            timeout,
            -1,
            Blanking::DEFAULT,
            Exposures::DEFAULT,
        )?;
        Ok(())
    }

    fn select_touch_events(&self, window: Window) -> Result<(), XError> {
        if !self.xinput {
            return Err(XError::MissingExtension(xinput::X11_EXTENSION_NAME));
        }
        let mask = xinput::EventMask {
            deviceid: XI_ALL_MASTER_DEVICES,
            mask: vec![
                xinput::XIEventMask::TOUCH_BEGIN
                    | xinput::XIEventMask::TOUCH_UPDATE
                    | xinput::XIEventMask::TOUCH_END,
            ],
        };
        xinput::xi_select_events(&self.conn, window, &[mask])?;
        Ok(())
    }

    fn monitors(&self) -> Result<Vec<MonitorInfo>, XError> {
        if !self.randr {
            return Err(XError::MissingExtension(randr::X11_EXTENSION_NAME));
        }
        let reply = randr::get_monitors(&self.conn, self.screen.root, true)?.reply()?;
        Ok(reply
            .monitors
            .iter()
            .map(|m| MonitorInfo {
                x: i32::from(m.x),
                y: i32::from(m.y),
                width: u32::from(m.width),
                height: u32::from(m.height),
                width_mm: m.width_in_millimeters,
                height_mm: m.height_in_millimeters,
                primary: m.primary,
            })
            .collect())
    }

    fn raw_fd(&self) -> Option<RawFd> {
        Some(self.conn.stream().as_raw_fd())
    }

    fn poll_event(&self) -> Result<Option<Event>, XError> {
        if let Some(event) = self
            .stash
            .lock()
            .map_err(|_| XError::LockPoisoned)?
            .pop_front()
        {
            return Ok(Some(event));
        }
        Ok(self.conn.poll_for_event()?)
    }
}
