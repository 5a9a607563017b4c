use crate::VectorPath;
use lopdf::content::{Content, Operation};
use lopdf::{dictionary, Dictionary, Object};

/// Graphics state name used for a given stroke opacity.
fn opacity_state_name(alpha: f32) -> String {
    format!("InkGS{}", (alpha.clamp(0.0, 1.0) * 100.0).round() as u32)
}

/// Encodes paths as round-capped stroked polylines. Returns the content bytes
/// and the `ExtGState` entries the content refers to.
pub(crate) fn encode_paths(paths: &[VectorPath]) -> Result<(Vec<u8>, Dictionary), lopdf::Error> {
    let mut operations = vec![
        Operation::new("q", vec![]),
        Operation::new("J", vec![1.into()]),
        Operation::new("j", vec![1.into()]),
    ];
    let mut states = Dictionary::new();

    for path in paths {
        let Some(&(start_x, start_y)) = path.points.first() else {
            continue;
        };
        let [red, green, blue, alpha] = path.rgba;

        operations.push(Operation::new("q", vec![]));

        if alpha < 1.0 {
            let name = opacity_state_name(alpha);
            states.set(
                name.as_str(),
                dictionary! {
                    "Type" => "ExtGState",
                    "CA" => Object::Real(alpha.clamp(0.0, 1.0)),
                    "ca" => Object::Real(alpha.clamp(0.0, 1.0)),
                },
            );
            operations.push(Operation::new("gs", vec![Object::Name(name.into_bytes())]));
        }

        operations.push(Operation::new(
            "RG",
            vec![Object::Real(red), Object::Real(green), Object::Real(blue)],
        ));
        operations.push(Operation::new("w", vec![Object::Real(path.width.max(0.0))]));
        operations
            .push(Operation::new("m", vec![Object::Real(start_x), Object::Real(start_y)]));

        if path.points.len() == 1 {
            // a zero-length segment with round caps renders as a dot
            operations
                .push(Operation::new("l", vec![Object::Real(start_x), Object::Real(start_y)]));
        }
        for &(x, y) in path.points.iter().skip(1) {
            operations.push(Operation::new("l", vec![Object::Real(x), Object::Real(y)]));
        }

        operations.push(Operation::new("S", vec![]));
        operations.push(Operation::new("Q", vec![]));
    }

    operations.push(Operation::new("Q", vec![]));

    let bytes = Content { operations }.encode()?;
    Ok((bytes, states))
}
