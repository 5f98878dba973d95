use crate::Detection;

/// Nearest detection that has a distance. First one wins on exact ties.
pub fn nearest(dets: &[Detection]) -> Option<&Detection> {
    let mut best: Option<(&Detection, f32)> = None;
    for d in dets {
        let Some(dist) = d.distance_m else { continue };
        match best {
            Some((_, b)) if !(dist < b) => {}
            _ => best = Some((d, dist)),
        }
    }
    best.map(|(d, _)| d)
}
