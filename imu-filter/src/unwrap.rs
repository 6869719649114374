use crate::F;

/// Turns an angle that wraps at 0/360 into a continuous one.
#[derive(Debug, Clone, Default)]
pub struct AngleUnwrapper {
    previous: Option<F>,
    offset: F,
}

impl AngleUnwrapper {
    pub const fn new() -> Self {
        Self {
            previous: None,
            offset: 0.0,
        }
    }

    pub fn unwrap(&mut self, angle: F) -> F {
        let Some(previous) = self.previous.replace(angle) else {
            return angle;
        };

        let diff = angle - previous;
        if diff > 180.0 {
            self.offset -= 360.0;
        } else if diff < -180.0 {
            self.offset += 360.0;
        }

        angle + self.offset
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn offset(&self) -> F {
        self.offset
    }
}
