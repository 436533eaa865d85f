use crate::math::{self as m, Unit};
use crate::physics::{
    hash_set::HashValue,
    shape::{Polygon, Shape, ShapeKind},
};

/// determines how close to parallel two segments need to be to generate two contacts
const PARALLEL_SEGMENT_THRESHOLD: f64 = 0.005;
/// extra depth tolerated before polygon corners behind a segment are also considered contacts
const BEHIND_SEGMENT_SLOP: f64 = 0.1;

// feature tags mixed into contact ids so that ids from different features never clash
const SEGMENT_END_TAG: HashValue = 1;
const POLY_VERT_TAG: HashValue = 2;
const REF_FACE_TAG: HashValue = 3;

/// Contact id from a feature kind tag and up to two feature indices.
/// Order matters, so different features never share an id.
#[inline]
fn feature_id(tag: HashValue, first: HashValue, second: HashValue) -> HashValue {
    const MASK: HashValue = (1 << 28) - 1;
    (tag << 56) | ((first & MASK) << 28) | (second & MASK)
}

/// 0-2 points of contact can occur between two 2D objects.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum ContactResult {
    Zero,
    One(Contact),
    Two(Contact, Contact),
}

impl ContactResult {
    pub fn iter(&self) -> ContactIterator<'_> {
        ContactIterator { cr: self, idx: 0 }
    }

    /// Execute a function on every contact in the result.
    pub fn map(self, f: impl Fn(Contact) -> Contact) -> Self {
        match self {
            ContactResult::Zero => ContactResult::Zero,
            ContactResult::One(c) => ContactResult::One(f(c)),
            ContactResult::Two(c1, c2) => ContactResult::Two(f(c1), f(c2)),
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        match self {
            ContactResult::Zero => 0,
            ContactResult::One(_) => 1,
            ContactResult::Two(_, _) => 2,
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        matches!(self, ContactResult::Zero)
    }

    /// Add a contact if there's room. Contacts beyond the second are dropped.
    fn push(self, c: Contact) -> Self {
        match self {
            ContactResult::Zero => ContactResult::One(c),
            ContactResult::One(c1) => ContactResult::Two(c1, c),
            two => two,
        }
    }
}

/// An iterator over the contacts in a ContactResult.
pub struct ContactIterator<'a> {
    cr: &'a ContactResult,
    idx: u8,
}
impl<'a> Iterator for ContactIterator<'a> {
    type Item = &'a Contact;

    fn next(&mut self) -> Option<Self::Item> {
        self.idx += 1;
        use ContactResult::*;
        match (self.cr, self.idx - 1) {
            (Zero, _) => None,
            (One(c), 0) => Some(c),
            (One(_), _) => None,
            (Two(c1, _), 0) => Some(c1),
            (Two(_, c2), 1) => Some(c2),
            (Two(_, _), _) => None,
        }
    }
}

/// A point of contact between two shapes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Contact {
    /// Point of contact in world space, roughly halfway between the two surfaces.
    pub point: m::Vec2,
    /// The normal, facing away from shape 1 towards shape 2.
    pub normal: Unit<m::Vec2>,
    /// Distance between the surfaces along the normal.
    /// Negative when the shapes overlap, positive for speculative contacts.
    pub dist: f64,
    /// Identifies the features that generated the point,
    /// used to match contacts between steps.
    pub id: HashValue,
}

impl Contact {
    /// Penetration depth, i.e. the negated distance.
    #[inline]
    pub fn depth(&self) -> f64 {
        -self.dist
    }
}

/// Check two shapes for contact using their world-space geometry.
///
/// Contacts are generated for surfaces up to `margin` apart.
/// Normals always face from `shape1` to `shape2`.
pub fn collide(shape1: &Shape, shape2: &Shape, margin: f64) -> ContactResult {
    use ShapeKind::*;
    match (shape1.world(), shape2.world()) {
        (
            Circle {
                offset: c1,
                radius: r1,
            },
            Circle {
                offset: c2,
                radius: r2,
            },
        ) => circle_circle(*c1, *r1, *c2, *r2, margin, 0),
        (Circle { offset, radius }, Segment { a, b, radius: rs }) => {
            circle_segment(*offset, *radius, *a, *b, *rs, margin)
        }
        (Segment { a, b, radius: rs }, Circle { offset, radius }) => {
            flip_contacts(circle_segment(*offset, *radius, *a, *b, *rs, margin))
        }
        (
            Segment {
                a: a1,
                b: b1,
                radius: r1,
            },
            Segment {
                a: a2,
                b: b2,
                radius: r2,
            },
        ) => segment_segment(*a1, *b1, *r1, *a2, *b2, *r2, margin),
        (Circle { offset, radius }, Poly(poly)) => circle_poly(*offset, *radius, poly, margin),
        (Poly(poly), Circle { offset, radius }) => {
            flip_contacts(circle_poly(*offset, *radius, poly, margin))
        }
        (Segment { a, b, radius }, Poly(poly)) => segment_poly(*a, *b, *radius, poly, margin),
        (Poly(poly), Segment { a, b, radius }) => {
            flip_contacts(segment_poly(*a, *b, *radius, poly, margin))
        }
        (Poly(p1), Poly(p2)) => poly_poly(p1, p2, margin),
    }
}

fn flip_contacts(contacts: ContactResult) -> ContactResult {
    contacts.map(|c| Contact {
        normal: -c.normal,
        ..c
    })
}

//
// CIRCLE <-> CIRCLE
//

fn circle_circle(
    c1: m::Vec2,
    r1: f64,
    c2: m::Vec2,
    r2: f64,
    margin: f64,
    id: HashValue,
) -> ContactResult {
    let min_dist = r1 + r2;
    let delta = c2 - c1;
    let dist_sq = delta.mag_sq();
    let reach = min_dist + margin;
    if dist_sq > reach * reach {
        return ContactResult::Zero;
    }

    let dist = dist_sq.sqrt();
    let normal = if dist > 0.0 {
        Unit::new_unchecked(delta / dist)
    } else {
        // same position, consider penetration to be on x axis
        Unit::unit_x()
    };
    ContactResult::One(Contact {
        point: c1 + *normal * (r1 + 0.5 * (dist - min_dist)),
        normal,
        dist: dist - min_dist,
        id,
    })
}

//
// CIRCLE <-> SEGMENT
//

fn circle_segment(
    center: m::Vec2,
    r: f64,
    a: m::Vec2,
    b: m::Vec2,
    seg_r: f64,
    margin: f64,
) -> ContactResult {
    let closest = m::closest_point_on_segment(center, a, b);
    circle_circle(center, r, closest, seg_r, margin, 0)
}

//
// SEGMENT <-> SEGMENT
//

/// Parameters along two segments of their mutually closest points.
fn closest_segment_params(a1: m::Vec2, b1: m::Vec2, a2: m::Vec2, b2: m::Vec2) -> (f64, f64) {
    let d1 = b1 - a1;
    let d2 = b2 - a2;
    let r = a1 - a2;
    let len1 = d1.mag_sq();
    let len2 = d2.mag_sq();
    let f = d2.dot(r);

    if len1 == 0.0 && len2 == 0.0 {
        return (0.0, 0.0);
    }
    if len1 == 0.0 {
        return (0.0, m::clamp(f / len2, 0.0, 1.0));
    }
    let c = d1.dot(r);
    if len2 == 0.0 {
        return (m::clamp(-c / len1, 0.0, 1.0), 0.0);
    }

    let b = d1.dot(d2);
    let denom = len1 * len2 - b * b;
    // parallel segments have no unique closest pair, any point will do
    let s = if denom != 0.0 {
        m::clamp((b * f - c * len2) / denom, 0.0, 1.0)
    } else {
        0.0
    };
    let t = (b * s + f) / len2;
    if t < 0.0 {
        (m::clamp(-c / len1, 0.0, 1.0), 0.0)
    } else if t > 1.0 {
        (m::clamp((b - c) / len1, 0.0, 1.0), 1.0)
    } else {
        (s, t)
    }
}

fn segment_segment(
    a1: m::Vec2,
    b1: m::Vec2,
    r1: f64,
    a2: m::Vec2,
    b2: m::Vec2,
    r2: f64,
    margin: f64,
) -> ContactResult {
    let (s, t) = closest_segment_params(a1, b1, a2, b2);
    let p1 = m::lerp(a1, b1, s);
    let p2 = m::lerp(a2, b2, t);
    let min_dist = r1 + r2;
    let delta = p2 - p1;
    let dist = delta.mag();
    if dist > min_dist + margin {
        return ContactResult::Zero;
    }

    let dir1 = b1 - a1;
    let dir2 = b2 - a2;
    let normal = if dist > 0.0 {
        delta / dist
    } else {
        // crossing segments, push apart along the first one's normal
        let n = m::normalize_safe(m::left_normal(dir1));
        let n = if n == m::Vec2::zero() {
            m::Vec2::unit_x()
        } else {
            n
        };
        if n.dot((a2 + b2) - (a1 + b1)) < 0.0 {
            -n
        } else {
            n
        }
    };
    let normal = Unit::new_unchecked(normal);

    let len1 = dir1.mag();
    let len2 = dir2.mag();
    if len1 > 0.0 && len2 > 0.0 && m::cross(dir1 / len1, dir2 / len2).abs() < PARALLEL_SEGMENT_THRESHOLD
    {
        // overlap of segment 2 projected onto segment 1
        let u = dir1 / len1;
        let sa = (a2 - a1).dot(u);
        let sb = (b2 - a1).dot(u);
        let lo = sa.min(sb).max(0.0);
        let hi = sa.max(sb).min(len1);
        if hi > lo {
            let mut result = ContactResult::Zero;
            for (id, along) in [(0, lo), (1, hi)] {
                let q1 = a1 + u * along;
                let q2 = m::closest_point_on_segment(q1, a2, b2);
                let d = (q2 - q1).dot(*normal) - min_dist;
                if d <= margin {
                    result = result.push(Contact {
                        point: q1 + *normal * (r1 + 0.5 * d),
                        normal,
                        dist: d,
                        id: feature_id(SEGMENT_END_TAG, id, 0),
                    });
                }
            }
            if !result.is_empty() {
                return result;
            }
        }
    }

    ContactResult::One(Contact {
        point: p1 + *normal * (r1 + 0.5 * (dist - min_dist)),
        normal,
        dist: dist - min_dist,
        id: 0,
    })
}

//
// CIRCLE <-> POLYGON
//

fn circle_poly(center: m::Vec2, r: f64, poly: &Polygon, margin: f64) -> ContactResult {
    let mut min = f64::NEG_INFINITY;
    let mut mini = 0;
    for (i, axis) in poly.axes.iter().enumerate() {
        let dist = axis.n.dot(center) - axis.d - r;
        if dist > margin {
            return ContactResult::Zero;
        }
        if dist > min {
            min = dist;
            mini = i;
        }
    }

    let n = poly.axes[mini].n;
    let a = poly.verts[mini];
    let b = poly.verts[(mini + 1) % poly.verts.len()];
    let edge = b - a;
    let along = (center - a).dot(edge) / edge.mag_sq();
    if along < 0.0 {
        circle_circle(center, r, a, 0.0, margin, 0)
    } else if along > 1.0 {
        circle_circle(center, r, b, 0.0, margin, 0)
    } else {
        ContactResult::One(Contact {
            point: center - n * (r + min * 0.5),
            normal: Unit::new_unchecked(-n),
            dist: min,
            id: 0,
        })
    }
}

//
// SEGMENT <-> POLYGON
//

/// Distance of a capsule from a face of a polygon.
fn segment_value_on_axis(a: m::Vec2, b: m::Vec2, r: f64, n: m::Vec2, d: f64) -> f64 {
    (n.dot(a) - r).min(n.dot(b) - r) - d
}

fn segment_poly(a: m::Vec2, b: m::Vec2, seg_r: f64, poly: &Polygon, margin: f64) -> ContactResult {
    let dir = b - a;
    if dir.mag_sq() == 0.0 {
        return circle_poly(a, seg_r, poly, margin);
    }
    let seg_n = m::left_normal(dir).normalized();
    let seg_d = seg_n.dot(a);

    let min_norm = poly.value_on_axis(seg_n, seg_d) - seg_r;
    let min_neg = poly.value_on_axis(-seg_n, -seg_d) - seg_r;
    if min_neg > margin || min_norm > margin {
        return ContactResult::Zero;
    }

    let mut mini = 0;
    let mut poly_min = f64::NEG_INFINITY;
    for (i, axis) in poly.axes.iter().enumerate() {
        let dist = segment_value_on_axis(a, b, seg_r, axis.n, axis.d);
        if dist > margin {
            return ContactResult::Zero;
        }
        if dist > poly_min {
            poly_min = dist;
            mini = i;
        }
    }

    let poly_n = -poly.axes[mini].n;
    let normal = Unit::new_unchecked(poly_n);
    let mut result = ContactResult::Zero;

    // segment ends pushed into the polygon face
    for (id, end) in [(0, a), (1, b)] {
        let v = end + poly_n * seg_r;
        if poly.contains_point_within(v, margin.max(0.0)) {
            result = result.push(Contact {
                point: v,
                normal,
                dist: poly_min,
                id: feature_id(SEGMENT_END_TAG, id, 0),
            });
        }
    }

    // polygon corners poking into the segment's flat sides
    let poly_min = poly_min - BEHIND_SEGMENT_SLOP;
    if min_norm >= poly_min || min_neg >= poly_min {
        let (dist, coef) = if min_norm > min_neg {
            (min_norm, 1.0)
        } else {
            (min_neg, -1.0)
        };
        let n = seg_n * coef;
        let limit = seg_d * coef + seg_r + margin.max(0.0);
        let len_sq = dir.mag_sq();
        for (i, v) in poly.verts.iter().enumerate() {
            if v.dot(n) < limit {
                let along = (*v - a).dot(dir);
                if along >= 0.0 && along <= len_sq {
                    result = result.push(Contact {
                        point: *v,
                        normal: Unit::new_unchecked(n),
                        dist,
                        id: feature_id(POLY_VERT_TAG, i as HashValue, 0),
                    });
                }
            }
        }
    }

    if result.is_empty() {
        // nothing else found, try the rounded ends against the polygon's nearest corners
        let pa = poly.verts[mini];
        let pb = poly.verts[(mini + 1) % poly.verts.len()];
        for (end, corner) in [(a, pa), (b, pa), (a, pb), (b, pb)] {
            let res = circle_circle(end, seg_r, corner, 0.0, margin, 0);
            if !res.is_empty() {
                return res;
            }
        }
    }

    result
}

//
// POLYGON <-> POLYGON
//

/// Find the face of `poly1` that `poly2` is furthest outside of.
/// Earlier faces win ties.
fn max_separation(poly1: &Polygon, poly2: &Polygon) -> (f64, usize) {
    let mut best = (f64::NEG_INFINITY, 0);
    for (i, axis) in poly1.axes.iter().enumerate() {
        let sep = poly2.value_on_axis(axis.n, axis.d);
        if sep > best.0 {
            best = (sep, i);
        }
    }
    best
}

#[derive(Clone, Copy, Debug)]
struct ClipVertex {
    p: m::Vec2,
    id: HashValue,
}

/// Clip a segment to the half-plane `n.dot(p) <= offset`.
/// Returns None if less than two points remain.
fn clip_to_line(v: [ClipVertex; 2], n: m::Vec2, offset: f64) -> Option<[ClipVertex; 2]> {
    let d0 = n.dot(v[0].p) - offset;
    let d1 = n.dot(v[1].p) - offset;
    match (d0 <= 0.0, d1 <= 0.0) {
        (true, true) => Some(v),
        (false, false) => None,
        (inside0, _) => {
            let t = d0 / (d0 - d1);
            let p = v[0].p + (v[1].p - v[0].p) * t;
            // the clipped point keeps the id of the endpoint it replaced
            if inside0 {
                Some([v[0], ClipVertex { p, id: v[1].id }])
            } else {
                Some([ClipVertex { p, id: v[0].id }, v[1]])
            }
        }
    }
}

fn poly_poly(poly1: &Polygon, poly2: &Polygon, margin: f64) -> ContactResult {
    let (sep1, face1) = max_separation(poly1, poly2);
    if sep1 > margin {
        return ContactResult::Zero;
    }
    let (sep2, face2) = max_separation(poly2, poly1);
    if sep2 > margin {
        return ContactResult::Zero;
    }

    // exact ties prefer the first polygon's face
    let flip = sep2 > sep1;
    let (reference, incident, ref_face) = if flip {
        (poly2, poly1, face2)
    } else {
        (poly1, poly2, face1)
    };
    let ref_axis = reference.axes[ref_face];
    let n = ref_axis.n;

    // incident face is the one most opposed to the reference normal
    let mut inc_face = 0;
    let mut min_dot = f64::INFINITY;
    for (i, axis) in incident.axes.iter().enumerate() {
        let d = axis.n.dot(n);
        if d < min_dot {
            min_dot = d;
            inc_face = i;
        }
    }
    let inc_next = (inc_face + 1) % incident.verts.len();
    let incident_edge = [
        ClipVertex {
            p: incident.verts[inc_face],
            id: inc_face as HashValue,
        },
        ClipVertex {
            p: incident.verts[inc_next],
            id: inc_next as HashValue,
        },
    ];

    let r1 = reference.verts[ref_face];
    let r2 = reference.verts[(ref_face + 1) % reference.verts.len()];
    let tangent = (r2 - r1).normalized();
    let clipped = clip_to_line(incident_edge, -tangent, -tangent.dot(r1))
        .and_then(|edge| clip_to_line(edge, tangent, tangent.dot(r2)));
    let clipped = match clipped {
        Some(c) => c,
        None => return ContactResult::Zero,
    };

    let normal = Unit::new_unchecked(if flip { -n } else { n });
    let ref_id = ((ref_face as HashValue) << 1) | flip as HashValue;
    let mut result = ContactResult::Zero;
    for cv in clipped {
        let sep = n.dot(cv.p) - ref_axis.d;
        if sep <= margin {
            result = result.push(Contact {
                point: cv.p - n * (0.5 * sep),
                normal,
                dist: sep,
                id: feature_id(REF_FACE_TAG, ref_id, cv.id),
            });
        }
    }
    result
}
