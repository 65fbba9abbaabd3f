use serde::{Deserialize, Serialize};

/// Planar position or velocity, in meters (or meters per second).
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
}

impl Coord {
    pub const ZERO: Coord = Coord { x: 0.0, y: 0.0 };

    pub fn new(x: f64, y: f64) -> Self {
        Coord { x, y }
    }

    pub fn distance(&self, other: &Coord) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    pub fn length(&self) -> f64 {
        self.x.hypot(self.y)
    }
}

/// A named routing target (a road edge in the traffic simulator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Waypoint {
    pub name: String,
    pub position: Coord,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rgba(pub u8, pub u8, pub u8, pub u8);

impl Rgba {
    pub const YELLOW: Rgba = Rgba(255, 255, 0, 255);
    pub const RED: Rgba = Rgba(255, 0, 0, 255);
    pub const WHITE: Rgba = Rgba(255, 255, 255, 255);
    pub const BLUE: Rgba = Rgba(0, 100, 255, 255);
    pub const GRAY: Rgba = Rgba(128, 128, 128, 255);
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SpeedCommand {
    Stop,
    /// Hand speed control back to the mobility backend.
    Resume,
    Set(f64),
}

/// The narrow view an agent has of whatever moves it around.
///
/// All commands are best effort: the agent never inspects their outcome.
/// A backend without position data returns `None`, and callers fall back to
/// [`Coord::ZERO`].
pub trait Mobility: Send {
    fn position(&self) -> Option<Coord>;

    fn velocity(&self) -> Option<Coord>;

    fn reroute(&mut self, target: &Waypoint);

    fn set_speed(&mut self, speed: SpeedCommand);

    fn set_color(&mut self, color: Rgba);

    /// Advance the backend's own clock. Backends driven by an external
    /// traffic simulator ignore this.
    fn advance(&mut self, _dt_s: f64) {}
}

/// Drives in a straight line towards the current waypoint at cruise speed and
/// parks once it gets there.
#[derive(Debug, Clone)]
pub struct WaypointMobility {
    position: Coord,
    target: Option<Waypoint>,
    cruise_speed: f64,
    speed_override: Option<f64>,
    color: Rgba,
}

impl WaypointMobility {
    pub fn new(position: Coord, cruise_speed: f64) -> Self {
        WaypointMobility {
            position,
            target: None,
            cruise_speed,
            speed_override: None,
            color: Rgba::YELLOW,
        }
    }

    pub fn target(&self) -> Option<&Waypoint> {
        self.target.as_ref()
    }

    pub fn color(&self) -> Rgba {
        self.color
    }

    fn current_speed(&self) -> f64 {
        if self.target.is_none() {
            return 0.0;
        }
        self.speed_override.unwrap_or(self.cruise_speed)
    }
}

impl Mobility for WaypointMobility {
    fn position(&self) -> Option<Coord> {
        Some(self.position)
    }

    fn velocity(&self) -> Option<Coord> {
        let speed = self.current_speed();
        let Some(target) = &self.target else {
            return Some(Coord::ZERO);
        };
        let dist = self.position.distance(&target.position);
        if dist == 0.0 || speed == 0.0 {
            return Some(Coord::ZERO);
        }
        Some(Coord::new(
            (target.position.x - self.position.x) / dist * speed,
            (target.position.y - self.position.y) / dist * speed,
        ))
    }

    fn reroute(&mut self, target: &Waypoint) {
        self.target = Some(target.clone());
    }

    fn set_speed(&mut self, speed: SpeedCommand) {
        self.speed_override = match speed {
            SpeedCommand::Stop => Some(0.0),
            SpeedCommand::Resume => None,
            SpeedCommand::Set(value) => Some(value.max(0.0)),
        };
    }

    fn set_color(&mut self, color: Rgba) {
        self.color = color;
    }

    fn advance(&mut self, dt_s: f64) {
        let step = self.current_speed() * dt_s;
        let Some(target) = &self.target else {
            return;
        };
        let remaining = self.position.distance(&target.position);
        if remaining <= step {
            self.position = target.position;
            self.target = None;
        } else if step > 0.0 {
            let ratio = step / remaining;
            self.position.x += (target.position.x - self.position.x) * ratio;
            self.position.y += (target.position.y - self.position.y) * ratio;
        }
    }
}

/// A backend that never has position data.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoMobility;

impl Mobility for NoMobility {
    fn position(&self) -> Option<Coord> {
        None
    }

    fn velocity(&self) -> Option<Coord> {
        None
    }

    fn reroute(&mut self, _target: &Waypoint) {}

    fn set_speed(&mut self, _speed: SpeedCommand) {}

    fn set_color(&mut self, _color: Rgba) {}
}

#[cfg(test)]
mod test {
    use super::*;

    fn waypoint(x: f64, y: f64) -> Waypoint {
        Waypoint {
            name: "A1B1".into(),
            position: Coord::new(x, y),
        }
    }

    #[test]
    fn test_drives_towards_waypoint_and_parks() {
        let mut mobility = WaypointMobility::new(Coord::ZERO, 10.0);
        mobility.reroute(&waypoint(25.0, 0.0));

        mobility.advance(1.0);
        assert_eq!(mobility.position(), Some(Coord::new(10.0, 0.0)));
        assert_eq!(mobility.velocity(), Some(Coord::new(10.0, 0.0)));

        mobility.advance(1.0);
        mobility.advance(1.0);
        assert_eq!(mobility.position(), Some(Coord::new(25.0, 0.0)));
        assert!(mobility.target().is_none());
        assert_eq!(mobility.velocity(), Some(Coord::ZERO));
    }

    #[test]
    fn test_stop_and_resume() {
        let mut mobility = WaypointMobility::new(Coord::ZERO, 10.0);
        mobility.reroute(&waypoint(0.0, 100.0));

        mobility.set_speed(SpeedCommand::Stop);
        mobility.advance(5.0);
        assert_eq!(mobility.position(), Some(Coord::ZERO));

        mobility.set_speed(SpeedCommand::Resume);
        mobility.advance(2.0);
        assert_eq!(mobility.position(), Some(Coord::new(0.0, 20.0)));

        mobility.set_speed(SpeedCommand::Set(5.0));
        mobility.advance(2.0);
        assert_eq!(mobility.position(), Some(Coord::new(0.0, 30.0)));
    }

    #[test]
    fn test_coord_distance() {
        assert_eq!(Coord::new(0.0, 0.0).distance(&Coord::new(3.0, 4.0)), 5.0);
        assert_eq!(Coord::new(3.0, 4.0).length(), 5.0);
    }
}
