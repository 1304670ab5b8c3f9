//! Sub-rectangle geometry: the `--geometry`/`-g` grammar and the §3
//! validation invariant.

use crate::error::CaptureError;

/// A validated sub-rectangle of the source framebuffer. Fixed for the
/// entire recording session (§3: "Geometry is fixed at recording start;
/// it never changes mid-session").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Geometry {
    /// The full-frame geometry for a `width x height` source.
    pub fn full(width: u32, height: u32) -> Self {
        Geometry {
            x: 0,
            y: 0,
            w: width,
            h: height,
        }
    }

    /// Validate against the owning framebuffer's dimensions (§3: `0 ≤ x`,
    /// `0 ≤ y` are free (unsigned), `w > 0`, `h > 0`, `x+w ≤ width`,
    /// `y+h ≤ height`).
    pub fn validate(&self, fb_w: u32, fb_h: u32) -> Result<(), CaptureError> {
        let in_bounds = self.w > 0
            && self.h > 0
            && self
                .x
                .checked_add(self.w)
                .is_some_and(|right| right <= fb_w)
            && self
                .y
                .checked_add(self.h)
                .is_some_and(|bottom| bottom <= fb_h);

        if in_bounds {
            Ok(())
        } else {
            Err(CaptureError::GeometryOutOfBounds {
                x: self.x,
                y: self.y,
                w: self.w,
                h: self.h,
                fb_w,
                fb_h,
            })
        }
    }
}

/// A geometry as parsed off the command line, before defaults for an unset
/// `w`/`h` have been resolved against the framebuffer's real dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RawGeometry {
    pub x: u32,
    pub y: u32,
    pub w: Option<u32>,
    pub h: Option<u32>,
}

impl RawGeometry {
    /// Resolve unset `w`/`h` to "to the right/bottom edge" (§3).
    pub fn resolve(self, fb_w: u32, fb_h: u32) -> Geometry {
        Geometry {
            x: self.x,
            y: self.y,
            w: self.w.unwrap_or_else(|| fb_w.saturating_sub(self.x)),
            h: self.h.unwrap_or_else(|| fb_h.saturating_sub(self.y)),
        }
    }
}

/// Parse `X,Y[,WxH]`: digits form decimal integers, a comma advances the
/// field (X → Y → W), and a literal `x`/`X` separates W from H within the
/// third field.
///
/// §9 notes the original source has "an apparent reassignment chain bug
/// when the comma-separated form expands to three or four fields"; this
/// implementation sidesteps that class of bug entirely by tracking an
/// explicit field index instead of reassigning through a chain of
/// variables, so a malformed field can never silently overwrite an
/// earlier one.
pub fn parse_geometry(raw: &str) -> Result<RawGeometry, CaptureError> {
    let err = |reason: &'static str| {
        Err(CaptureError::GeometrySyntax {
            raw: raw.to_string(),
            reason,
        })
    };

    #[derive(Clone, Copy, PartialEq, Eq)]
    enum Field {
        X,
        Y,
        W,
        H,
    }

    let mut field = Field::X;
    let mut x: Option<u32> = None;
    let mut y: Option<u32> = None;
    let mut w: Option<u32> = None;
    let mut h: Option<u32> = None;
    let mut current = String::new();

    fn flush(
        field: Field,
        current: &mut String,
        x: &mut Option<u32>,
        y: &mut Option<u32>,
        w: &mut Option<u32>,
        h: &mut Option<u32>,
    ) -> Result<(), &'static str> {
        if current.is_empty() {
            return match field {
                Field::X | Field::Y => Err("missing required field"),
                Field::W | Field::H => Ok(()), // unset W/H is permitted
            };
        }
        let value: u32 = current.parse().map_err(|_| "field is not a decimal integer")?;
        match field {
            Field::X => *x = Some(value),
            Field::Y => *y = Some(value),
            Field::W => *w = Some(value),
            Field::H => *h = Some(value),
        }
        current.clear();
        Ok(())
    }

    for ch in raw.chars() {
        match ch {
            '0'..='9' => current.push(ch),
            ',' => {
                if field == Field::H {
                    return err("too many comma-separated fields");
                }
                if let Err(reason) = flush(field, &mut current, &mut x, &mut y, &mut w, &mut h) {
                    return err(reason);
                }
                field = match field {
                    Field::X => Field::Y,
                    Field::Y => Field::W,
                    Field::W | Field::H => unreachable!(),
                };
            }
            'x' | 'X' => {
                if field != Field::W {
                    return err("'x' separator is only valid between W and H");
                }
                if let Err(reason) = flush(field, &mut current, &mut x, &mut y, &mut w, &mut h) {
                    return err(reason);
                }
                field = Field::H;
            }
            _ => return err("unexpected character"),
        }
    }
    if let Err(reason) = flush(field, &mut current, &mut x, &mut y, &mut w, &mut h) {
        return err(reason);
    }

    let (x, y) = match (x, y) {
        (Some(x), Some(y)) => (x, y),
        _ => return err("X and Y are required"),
    };

    Ok(RawGeometry { x, y, w, h })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_xy() {
        let g = parse_geometry("10,20").unwrap();
        assert_eq!(g, RawGeometry { x: 10, y: 20, w: None, h: None });
    }

    #[test]
    fn parses_full_rect() {
        let g = parse_geometry("16,2,32x4").unwrap();
        assert_eq!(
            g,
            RawGeometry { x: 16, y: 2, w: Some(32), h: Some(4) }
        );
    }

    #[test]
    fn resolves_unset_w_h_to_edges() {
        let g = parse_geometry("10,20").unwrap().resolve(100, 200);
        assert_eq!(g, Geometry { x: 10, y: 20, w: 90, h: 180 });
    }

    #[test]
    fn rejects_missing_xy() {
        assert!(parse_geometry("10").is_err());
    }

    #[test]
    fn rejects_x_before_w_field() {
        assert!(parse_geometry("10x20,5").is_err());
    }

    #[test]
    fn validate_rejects_out_of_bounds() {
        let g = Geometry { x: 90, y: 0, w: 20, h: 10 };
        assert!(g.validate(100, 100).is_err());
    }

    #[test]
    fn validate_accepts_exact_fit() {
        let g = Geometry { x: 0, y: 0, w: 100, h: 100 };
        assert!(g.validate(100, 100).is_ok());
    }
}
