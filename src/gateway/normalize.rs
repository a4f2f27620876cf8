use bson::{Bson, Document as BsonDocument};

/// Plain-string form of a store identifier.
///
/// `ObjectId` becomes its hex form, `{"$oid": s}` becomes `s` and integers their decimal
/// form. Strings pass unchanged; anything else has no string form.
#[must_use]
pub fn id_string(id: &Bson) -> Option<String> {
    match id {
        Bson::String(s) => Some(s.clone()),
        Bson::ObjectId(oid) => Some(oid.to_hex()),
        Bson::Int32(i) => Some(i.to_string()),
        Bson::Int64(i) => Some(i.to_string()),
        Bson::Document(d) => match (d.len(), d.get("$oid")) {
            (1, Some(Bson::String(s))) => Some(s.clone()),
            _ => None,
        },
        _ => None,
    }
}

/// Normalise an identifier, passing through representations without a string form.
#[must_use]
pub fn normalize_id(id: Bson) -> Bson {
    id_string(&id).map_or(id, Bson::String)
}

/// Normalise the top-level `_id` and the `_id` of every embedded review.
#[must_use]
pub fn normalize_record(mut doc: BsonDocument) -> BsonDocument {
    if let Some(id) = doc.remove("_id") {
        let mut out = BsonDocument::new();
        out.insert("_id", normalize_id(id));
        out.extend(doc);
        doc = out;
    }
    if let Some(Bson::Array(reviews)) = doc.get_mut("reviews") {
        for review in reviews.iter_mut() {
            if let Bson::Document(r) = review
                && let Some(id) = r.get_mut("_id")
            {
                let taken = std::mem::replace(id, Bson::Null);
                *id = normalize_id(taken);
            }
        }
    }
    doc
}
