use std::any::Any;

use crate::heap::TableId;

/// Full userdata: an opaque host payload plus an optional metatable.
pub struct LuaUserdata {
    pub data: Box<dyn Any>,
    pub metatable: Option<TableId>,
}

impl LuaUserdata {
    pub fn new(data: Box<dyn Any>) -> Self {
        Self {
            data,
            metatable: None,
        }
    }

    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    pub fn downcast_mut<T: 'static>(&mut self) -> Option<&mut T> {
        self.data.downcast_mut::<T>()
    }
}
