//! Integer screen geometry used at the peer boundary.

/// A position in pixels.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    pub fn offset(self, dx: i32, dy: i32) -> Self {
        Self::new(self.x + dx, self.y + dy)
    }
}

/// An axis-aligned rectangle. Width and height are never negative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width: width.max(0),
            height: height.max(0),
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }

    pub fn right(&self) -> i32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn contains(&self, p: Point) -> bool {
        p.x >= self.x && p.y >= self.y && p.x < self.right() && p.y < self.bottom()
    }

    pub fn with_position(self, p: Point) -> Self {
        Self { x: p.x, y: p.y, ..self }
    }

    pub fn translated(self, dx: i32, dy: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            ..self
        }
    }

    pub fn intersection(&self, other: &Rect) -> Rect {
        let x = self.x.max(other.x);
        let y = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        Rect::new(x, y, right - x, bottom - y)
    }

    /// Scale every edge by `factor`, rounding outwards.
    pub fn scaled(&self, factor: f64) -> Rect {
        let x = (f64::from(self.x) * factor).floor() as i32;
        let y = (f64::from(self.y) * factor).floor() as i32;
        let right = (f64::from(self.right()) * factor).ceil() as i32;
        let bottom = (f64::from(self.bottom()) * factor).ceil() as i32;
        Rect::new(x, y, right - x, bottom - y)
    }
}

/// Thickness of the window manager's frame around a window.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BorderSize {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}
