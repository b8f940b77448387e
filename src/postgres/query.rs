//! Stateless query-fragment helpers.

use sqlx::{Encode, Postgres, QueryBuilder, Type};

/// Appends a parenthesised, comma-separated list of bind parameters for use
/// with `IN`:
///
/// ```
/// use pg_handle::push_in;
/// use sqlx::{Postgres, QueryBuilder};
///
/// let mut qb = QueryBuilder::<Postgres>::new("SELECT * FROM users WHERE id IN ");
/// push_in(&mut qb, [1i64, 2, 3, 4]);
/// assert_eq!(qb.sql(), "SELECT * FROM users WHERE id IN ($1, $2, $3, $4)");
/// ```
///
/// An empty iterator yields `()`, which the server rejects.
pub fn push_in<'args, T, I>(builder: &mut QueryBuilder<'args, Postgres>, values: I)
where
    I: IntoIterator<Item = T>,
    T: 'args + Encode<'args, Postgres> + Type<Postgres> + Send,
{
    builder.push("(");
    let mut separated = builder.separated(", ");
    for value in values {
        separated.push_bind(value);
    }
    separated.push_unseparated(")");
}
