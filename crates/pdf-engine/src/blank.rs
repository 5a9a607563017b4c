use crate::{PageSize, PdfEngineError};
use lopdf::{dictionary, Document, Object};

/// Builds a document of empty pages with the given sizes.
pub fn blank_document(page_sizes: &[PageSize]) -> Result<Vec<u8>, PdfEngineError> {
    if page_sizes.is_empty() {
        return Err(PdfEngineError::Backend("document needs at least one page".to_owned()));
    }

    let mut doc = Document::with_version("1.7");
    let pages_id = doc.new_object_id();

    let kids: Vec<Object> = page_sizes
        .iter()
        .map(|size| {
            let page_id = doc.add_object(dictionary! {
                "Type" => "Page",
                "Parent" => Object::Reference(pages_id),
                "MediaBox" => vec![
                    0.into(),
                    0.into(),
                    Object::Real(size.width_pt),
                    Object::Real(size.height_pt),
                ],
                "Resources" => dictionary! {},
            });
            Object::Reference(page_id)
        })
        .collect();

    let count = kids.len() as i64;
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => kids,
            "Count" => count,
        }),
    );

    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => Object::Reference(pages_id),
    });
    doc.trailer.set("Root", Object::Reference(catalog_id));

    let mut buffer = Vec::new();
    doc.save_to(&mut buffer)?;
    Ok(buffer)
}
