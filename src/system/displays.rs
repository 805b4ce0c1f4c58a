//! Physical monitors as seen by the toolkit.

use crate::geometry::Rect;
use crate::property::XProperty;
use crate::protocol::{MonitorInfo, ScreenInfo, XProtocol, predefined};

use super::WindowSystem;

const MM_PER_INCH: f64 = 25.4;
/// Used when a monitor reports no physical size.
const FALLBACK_DPI: f64 = 96.0;

/// One monitor in logical coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayInfo {
    pub total_area: Rect,
    /// `total_area` minus panels and docks reserved by the desktop.
    pub user_area: Rect,
    pub scale: f64,
    pub dpi: f64,
    pub is_main: bool,
}

fn dpi(pixels: u32, millimetres: u32) -> f64 {
    if pixels == 0 || millimetres == 0 {
        return FALLBACK_DPI;
    }
    f64::from(pixels) / (f64::from(millimetres) / MM_PER_INCH)
}

fn screen_as_monitor(screen: &ScreenInfo) -> MonitorInfo {
    MonitorInfo {
        x: 0,
        y: 0,
        width: u32::from(screen.width),
        height: u32::from(screen.height),
        width_mm: u32::from(screen.width_mm),
        height_mm: u32::from(screen.height_mm),
        primary: true,
    }
}

/// Turn raw monitors into displays. The first monitor is main when none
/// is flagged primary.
fn build_displays(monitors: &[MonitorInfo], work_area: Option<Rect>, scale: f64) -> Vec<DisplayInfo> {
    let main = monitors
        .iter()
        .position(|m| m.primary)
        .unwrap_or(0);
    monitors
        .iter()
        .enumerate()
        .map(|(i, m)| {
            let total = Rect::new(m.x, m.y, m.width as i32, m.height as i32);
            let user = match work_area {
                Some(area) if !total.intersection(&area).is_empty() => total.intersection(&area),
                _ => total,
            };
            DisplayInfo {
                total_area: total.scaled(1.0 / scale),
                user_area: user.scaled(1.0 / scale),
                scale,
                dpi: dpi(m.width, m.width_mm),
                is_main: i == main,
            }
        })
        .collect()
}

impl<C: XProtocol> WindowSystem<C> {
    /// Every connected monitor, scaled by the desktop scale factor times
    /// `master_scale`.
    pub fn find_displays(&self, master_scale: f64) -> Vec<DisplayInfo> {
        let scale = self.window_scaling_factor() * master_scale.max(f64::EPSILON);
        self.with_conn("find_displays", |d, conn| {
            let mut monitors = match conn.monitors() {
                Ok(monitors) => monitors,
                Err(e) => {
                    tracing::debug!(error = %e, "monitor query failed, using root screen");
                    Vec::new()
                }
            };
            if monitors.is_empty() {
                monitors.push(screen_as_monitor(&d.screen));
            }

            let work_area_atom = d.atom(conn, "_NET_WORKAREA");
            let work_area = match XProperty::fetch(
                conn,
                d.screen.root,
                work_area_atom,
                0,
                4,
                false,
                predefined::CARDINAL,
            )
            .as_u32s()[..]
            {
                [x, y, w, h, ..] => Some(Rect::new(x as i32, y as i32, w as i32, h as i32)),
                _ => None,
            };

            Ok(build_displays(&monitors, work_area, scale))
        })
        .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::system;
    use super::*;
    use crate::property::u32_bytes;
    use crate::protocol::fake::ROOT;

    fn monitor(x: i32, width: u32, primary: bool) -> MonitorInfo {
        MonitorInfo {
            x,
            y: 0,
            width,
            height: 1000,
            width_mm: 254,
            height_mm: 254,
            primary,
        }
    }

    // -- Pure --

    #[test]
    fn dpi_from_physical_size() {
        assert_eq!(dpi(1000, 254), 100.0);
        assert_eq!(dpi(1000, 0), FALLBACK_DPI);
    }

    #[test]
    fn first_monitor_is_main_without_primary() {
        let displays = build_displays(&[monitor(0, 1000, false), monitor(1000, 1000, false)], None, 1.0);
        assert!(displays[0].is_main);
        assert!(!displays[1].is_main);
    }

    #[test]
    fn primary_monitor_is_main() {
        let displays = build_displays(&[monitor(0, 1000, false), monitor(1000, 1000, true)], None, 1.0);
        assert!(!displays[0].is_main);
        assert!(displays[1].is_main);
    }

    #[test]
    fn work_area_clips_user_area() {
        let work = Rect::new(0, 30, 2000, 970);
        let displays = build_displays(&[monitor(0, 1000, true), monitor(1000, 1000, false)], Some(work), 1.0);
        assert_eq!(displays[0].user_area, Rect::new(0, 30, 1000, 970));
        assert_eq!(displays[1].total_area, Rect::new(1000, 0, 1000, 1000));
        assert_eq!(displays[1].user_area, Rect::new(1000, 30, 1000, 970));
    }

    #[test]
    fn areas_are_in_logical_units() {
        let displays = build_displays(&[monitor(0, 1000, true)], None, 2.0);
        assert_eq!(displays[0].total_area, Rect::new(0, 0, 500, 500));
        assert_eq!(displays[0].scale, 2.0);
    }

    // -- Facade --

    #[test]
    fn falls_back_to_root_screen() {
        let (_server, system) = system();
        let displays = system.find_displays(1.0);
        assert_eq!(displays.len(), 1);
        assert_eq!(displays[0].total_area, Rect::new(0, 0, 1920, 1080));
        assert!(displays[0].is_main);
    }

    #[test]
    fn reads_monitors_and_work_area() {
        let (server, system) = system();
        server.state().monitors = vec![monitor(0, 1000, false), monitor(1000, 1000, true)];
        let work_area = server.atom("_NET_WORKAREA");
        server.set_property(
            ROOT,
            work_area,
            predefined::CARDINAL,
            32,
            &u32_bytes(&[0, 0, 2000, 950]),
        );

        let displays = system.find_displays(1.0);
        assert_eq!(displays.len(), 2);
        assert!(displays[1].is_main);
        assert_eq!(displays[0].user_area, Rect::new(0, 0, 1000, 950));
    }

    #[test]
    fn disabled_system_has_no_displays() {
        let system: WindowSystem<crate::protocol::fake::FakeServer> =
            WindowSystem::disabled(Default::default());
        assert!(system.find_displays(1.0).is_empty());
    }
}
