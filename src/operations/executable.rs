use crate::frame::Response;
use crate::store::Database;
use crate::Error;

pub trait Executable {
    fn exec(self, db: Database) -> Result<Response, Error>;
}
