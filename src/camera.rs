use glam::{Mat4, Vec3};
use serde::Deserialize;

use crate::{renderer::Projection, scene::Bounds};

#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct CameraSettings {
    pub fovy_degrees: f32,
    pub near: f32,
    pub far: f32,
    /// Degrees of rotation per pixel dragged.
    pub rotate_speed: f32,
    /// World units per wheel unit or dragged pixel, before bounds fitting rescales it.
    pub zoom_speed: f32,
    /// Approach rate of the smoothed state towards its target, per second.
    pub smoothing: f32,
}

impl Default for CameraSettings {
    fn default() -> Self {
        Self { fovy_degrees: 70.0, near: 0.1, far: 10000.0, rotate_speed: 0.5, zoom_speed: 0.01, smoothing: 10.0 }
    }
}

impl CameraSettings {
    pub fn projection(&self) -> Projection {
        Projection { fovy_degrees: self.fovy_degrees, near: self.near, far: self.far }
    }
}

const YAW_LIMIT: f32 = 75.0;
const MIN_RADIUS: f32 = 2.0;

#[derive(Clone, Copy, Debug, PartialEq)]
struct Orbit {
    pitch: f32,
    yaw: f32,
    radius: f32,
    at: Vec3,
}

impl Orbit {
    fn eye(&self) -> Vec3 {
        let (x, y) = (self.pitch.to_radians(), self.yaw.to_radians());
        Vec3::new(y.cos() * x.cos(), y.sin(), y.cos() * x.sin()) * self.radius + self.at
    }

    fn view(&self) -> Mat4 {
        Mat4::look_at_rh(self.eye(), self.at, Vec3::Y)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DragMode {
    Rotate,
    Pan,
}

#[derive(Clone, Copy, Debug)]
struct Drag {
    mode: DragMode,
    start: (f32, f32),
    origin: Orbit,
}

/// Orbit camera around a look-at point. Input moves a target state; `update` eases the
/// current state towards it.
#[derive(Clone, Debug)]
pub struct OrbitCamera {
    settings: CameraSettings,
    current: Orbit,
    target: Orbit,
    zoom_speed: f32,
    drag: Option<Drag>,
}

impl OrbitCamera {
    pub fn new(settings: CameraSettings) -> Self {
        let orbit = Orbit { pitch: 0.0, yaw: 0.0, radius: 5.0, at: Vec3::ZERO };
        Self { zoom_speed: settings.zoom_speed, settings, current: orbit, target: orbit, drag: None }
    }

    pub fn settings(&self) -> &CameraSettings {
        &self.settings
    }

    /// Centers on the bounds and backs off by their largest extent. Snaps without easing.
    pub fn fit_bounds(&mut self, bounds: &Bounds) {
        if bounds.is_empty() {
            return;
        }
        let radius = bounds.size().max_element();
        self.current.at = bounds.center();
        self.current.radius = radius;
        self.target.at = self.current.at;
        self.target.radius = radius;
        self.zoom_speed = radius / 1000.0;
        log::debug!("camera fitted to {:?} with radius {radius}", bounds.center());
    }

    pub fn begin_drag(&mut self, mode: DragMode, x: f32, y: f32) {
        self.drag = Some(Drag { mode, start: (x, y), origin: self.current });
    }

    pub fn drag_to(&mut self, x: f32, y: f32) {
        let Some(drag) = self.drag else {
            return;
        };
        let (start_x, start_y) = drag.start;
        match drag.mode {
            DragMode::Rotate => {
                self.target.pitch = drag.origin.pitch + (x - start_x) * self.settings.rotate_speed;
                self.target.yaw =
                    (drag.origin.yaw + (y - start_y) * self.settings.rotate_speed).clamp(-YAW_LIMIT, YAW_LIMIT);
            }
            DragMode::Pan => {
                let view = self.current.view();
                let right = view.row(0).truncate();
                let up = view.row(1).truncate();
                self.target.at = drag.origin.at
                    + right * (start_x - x) * self.zoom_speed
                    + up * (y - start_y) * self.zoom_speed;
            }
        }
    }

    pub fn end_drag(&mut self) {
        self.drag = None;
    }

    pub fn is_dragging(&self) -> bool {
        self.drag.is_some()
    }

    pub fn zoom(&mut self, delta: f32) {
        self.target.radius = (self.target.radius + delta * self.zoom_speed).max(MIN_RADIUS);
    }

    /// Eases towards the target by `smoothing * dt` (capped at a full step) and returns the view.
    pub fn update(&mut self, dt: f32) -> Mat4 {
        let amount = (self.settings.smoothing * dt).clamp(0.0, 1.0);
        let (current, target) = (&mut self.current, &self.target);
        current.pitch += (target.pitch - current.pitch) * amount;
        current.yaw += (target.yaw - current.yaw) * amount;
        current.radius += (target.radius - current.radius) * amount;
        current.at += (target.at - current.at) * amount;
        current.view()
    }

    pub fn view(&self) -> Mat4 {
        self.current.view()
    }

    pub fn eye(&self) -> Vec3 {
        self.current.eye()
    }

    pub fn look_at(&self) -> Vec3 {
        self.current.at
    }

    pub fn radius(&self) -> f32 {
        self.current.radius
    }
}

#[cfg(test)]
mod tests {
    use approx::assert_relative_eq;

    use super::*;

    #[test]
    fn starts_on_the_positive_x_axis() {
        let camera = OrbitCamera::new(CameraSettings::default());
        assert!(camera.eye().abs_diff_eq(Vec3::new(5.0, 0.0, 0.0), 1e-5));
        let expected = Mat4::look_at_rh(Vec3::new(5.0, 0.0, 0.0), Vec3::ZERO, Vec3::Y);
        assert!(camera.view().abs_diff_eq(expected, 1e-5));
    }

    #[test]
    fn fit_bounds_centers_and_rescales_zoom() {
        let mut camera = OrbitCamera::new(CameraSettings::default());
        camera.fit_bounds(&Bounds { min: Vec3::new(-1.0, 0.0, -0.5), max: Vec3::new(1.0, 4.0, 0.5) });
        assert!(camera.look_at().abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-6));
        assert_relative_eq!(camera.radius(), 4.0);

        camera.zoom(1000.0);
        camera.update(1.0);
        assert_relative_eq!(camera.radius(), 8.0);

        camera.fit_bounds(&Bounds::EMPTY);
        assert!(camera.look_at().abs_diff_eq(Vec3::new(0.0, 2.0, 0.0), 1e-6));
    }

    #[test]
    fn rotation_clamps_yaw_and_eases_in() {
        let mut camera = OrbitCamera::new(CameraSettings::default());
        camera.begin_drag(DragMode::Rotate, 0.0, 0.0);
        camera.drag_to(20.0, 400.0);
        camera.end_drag();

        camera.update(0.05);
        assert_relative_eq!(camera.current.pitch, 5.0);
        assert_relative_eq!(camera.current.yaw, 37.5);
        camera.update(10.0);
        assert_relative_eq!(camera.current.yaw, 75.0);
    }

    #[test]
    fn zoom_keeps_a_minimum_radius() {
        let mut camera = OrbitCamera::new(CameraSettings::default());
        camera.zoom(-100_000.0);
        camera.update(1.0);
        assert_relative_eq!(camera.radius(), 2.0);
    }

    #[test]
    fn pan_moves_the_look_at_point_sideways() {
        let mut camera = OrbitCamera::new(CameraSettings::default());
        camera.begin_drag(DragMode::Pan, 100.0, 100.0);
        camera.drag_to(0.0, 100.0);
        camera.update(1.0);
        // looking down -X from +X, screen right is -Z
        assert!(camera.look_at().abs_diff_eq(Vec3::new(0.0, 0.0, -1.0), 1e-5));
    }
}
